//! Execution-free reader for ECMA-335 assembly metadata.
//!
//! `goblin` parses the PE container and hands us the CLR header; from there
//! the metadata root, the `#~` table stream and the `#Strings`, `#Blob` and
//! `#GUID` heaps are read directly. Only the tables needed to name types,
//! follow their base types and decode their custom attributes are
//! interpreted (`Module` through `CustomAttribute`). Nothing in the image is
//! ever executed.
//!
//! Assemblies are loaded into a [`ReflectionContext`]. Types are identified
//! by namespace-qualified name only, never by which assembly defined them,
//! so the same logical type loaded twice at different versions still
//! compares equal.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;

use goblin::pe::PE;
use goblin::pe::section_table::SectionTable;
use tracing::debug;

use crate::error::ExportError;

const METADATA_SIGNATURE: u32 = 0x424A_5342;

const TYPE_ATTR_VISIBILITY_MASK: u32 = 0x07;
const TYPE_ATTR_PUBLIC: u32 = 0x01;
const TYPE_ATTR_NESTED_PUBLIC: u32 = 0x02;
const TYPE_ATTR_INTERFACE: u32 = 0x20;
const TYPE_ATTR_ABSTRACT: u32 = 0x80;

// Table numbers.
const MODULE: usize = 0x00;
const TYPE_REF: usize = 0x01;
const TYPE_DEF: usize = 0x02;
const FIELD: usize = 0x04;
const METHOD_DEF: usize = 0x06;
const PARAM: usize = 0x08;
const INTERFACE_IMPL: usize = 0x09;
const MEMBER_REF: usize = 0x0A;
const CUSTOM_ATTRIBUTE: usize = 0x0C;
const DECL_SECURITY: usize = 0x0E;
const STAND_ALONE_SIG: usize = 0x11;
const EVENT: usize = 0x14;
const PROPERTY: usize = 0x17;
const MODULE_REF: usize = 0x1A;
const TYPE_SPEC: usize = 0x1B;
const ASSEMBLY: usize = 0x20;
const ASSEMBLY_REF: usize = 0x23;
const FILE: usize = 0x26;
const EXPORTED_TYPE: usize = 0x27;
const MANIFEST_RESOURCE: usize = 0x28;
const GENERIC_PARAM: usize = 0x2A;
const METHOD_SPEC: usize = 0x2B;
const GENERIC_PARAM_CONSTRAINT: usize = 0x2C;

struct CodedIndex {
    tables: &'static [usize],
    bits: u32,
}

const TYPE_DEF_OR_REF: CodedIndex = CodedIndex {
    tables: &[TYPE_DEF, TYPE_REF, TYPE_SPEC],
    bits: 2,
};
const RESOLUTION_SCOPE: CodedIndex = CodedIndex {
    tables: &[MODULE, MODULE_REF, ASSEMBLY_REF, TYPE_REF],
    bits: 2,
};
const MEMBER_REF_PARENT: CodedIndex = CodedIndex {
    tables: &[TYPE_DEF, TYPE_REF, MODULE_REF, METHOD_DEF, TYPE_SPEC],
    bits: 3,
};
const HAS_CONSTANT: CodedIndex = CodedIndex {
    tables: &[FIELD, PARAM, PROPERTY],
    bits: 2,
};
const HAS_CUSTOM_ATTRIBUTE: CodedIndex = CodedIndex {
    tables: &[
        METHOD_DEF,
        FIELD,
        TYPE_REF,
        TYPE_DEF,
        PARAM,
        INTERFACE_IMPL,
        MEMBER_REF,
        MODULE,
        DECL_SECURITY,
        PROPERTY,
        EVENT,
        STAND_ALONE_SIG,
        MODULE_REF,
        TYPE_SPEC,
        ASSEMBLY,
        ASSEMBLY_REF,
        FILE,
        EXPORTED_TYPE,
        MANIFEST_RESOURCE,
        GENERIC_PARAM,
        GENERIC_PARAM_CONSTRAINT,
        METHOD_SPEC,
    ],
    bits: 5,
};
// Tags 0, 1 and 4 are unused; only the two real targets size the column.
const CUSTOM_ATTRIBUTE_TYPE: CodedIndex = CodedIndex {
    tables: &[METHOD_DEF, MEMBER_REF],
    bits: 3,
};

const HAS_CUSTOM_ATTRIBUTE_TYPE_DEF: u32 = 3;
const ATTRIBUTE_CTOR_METHOD_DEF: u32 = 2;
const ATTRIBUTE_CTOR_MEMBER_REF: u32 = 3;

enum Col {
    U8,
    U16,
    U32,
    Str,
    Guid,
    Blob,
    Index(usize),
    Coded(&'static CodedIndex),
}

/// Column layouts of tables `0x00..=0x0C`, in table order.
const LAYOUTS: [&[Col]; 13] = [
    // Module
    &[Col::U16, Col::Str, Col::Guid, Col::Guid, Col::Guid],
    // TypeRef
    &[Col::Coded(&RESOLUTION_SCOPE), Col::Str, Col::Str],
    // TypeDef
    &[
        Col::U32,
        Col::Str,
        Col::Str,
        Col::Coded(&TYPE_DEF_OR_REF),
        Col::Index(FIELD),
        Col::Index(METHOD_DEF),
    ],
    // FieldPtr
    &[Col::Index(FIELD)],
    // Field
    &[Col::U16, Col::Str, Col::Blob],
    // MethodPtr
    &[Col::Index(METHOD_DEF)],
    // MethodDef
    &[
        Col::U32,
        Col::U16,
        Col::U16,
        Col::Str,
        Col::Blob,
        Col::Index(PARAM),
    ],
    // ParamPtr
    &[Col::Index(PARAM)],
    // Param
    &[Col::U16, Col::U16, Col::Str],
    // InterfaceImpl
    &[Col::Index(TYPE_DEF), Col::Coded(&TYPE_DEF_OR_REF)],
    // MemberRef
    &[Col::Coded(&MEMBER_REF_PARENT), Col::Str, Col::Blob],
    // Constant
    &[Col::U8, Col::U8, Col::Coded(&HAS_CONSTANT), Col::Blob],
    // CustomAttribute
    &[
        Col::Coded(&HAS_CUSTOM_ATTRIBUTE),
        Col::Coded(&CUSTOM_ATTRIBUTE_TYPE),
        Col::Blob,
    ],
];

/// A namespace-qualified type name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeName {
    /// Empty for the global namespace.
    pub namespace: String,
    /// Simple name, including any generic arity suffix.
    pub name: String,
}

impl TypeName {
    /// Build a name from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `Namespace.Name`, or just `Name` for the global namespace.
    pub fn full_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// A decoded fixed constructor argument of a custom attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrArg {
    /// A string; `None` for a null string.
    String(Option<String>),
    /// A string array; `None` for a null array.
    StringArray(Option<Vec<String>>),
    /// Any argument of a type the reader does not decode.
    Other,
}

/// A custom attribute applied to a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomAttribute {
    /// The attribute class, resolved from its constructor.
    pub attribute_type: TypeName,
    /// Fixed constructor arguments, empty when the blob could not be decoded.
    pub args: Vec<AttrArg>,
}

impl CustomAttribute {
    /// Every string carried by the fixed arguments, flattening arrays.
    pub fn string_values(&self) -> Vec<String> {
        let mut out = Vec::new();
        for arg in &self.args {
            match arg {
                AttrArg::String(Some(s)) => out.push(s.clone()),
                AttrArg::StringArray(Some(items)) => out.extend(items.iter().cloned()),
                _ => {}
            }
        }
        out
    }
}

/// A type defined by an assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    /// Namespace-qualified name.
    pub name: TypeName,
    /// Raw `TypeAttributes`.
    pub flags: u32,
    /// Base type, when it is a plain type definition or reference.
    pub extends: Option<TypeName>,
    /// Custom attributes applied to the type.
    pub attributes: Vec<CustomAttribute>,
}

impl TypeInfo {
    /// Abstract classes and interfaces.
    pub fn is_abstract(&self) -> bool {
        self.flags & (TYPE_ATTR_ABSTRACT | TYPE_ATTR_INTERFACE) != 0
    }

    /// Public, or nested public.
    pub fn is_public(&self) -> bool {
        matches!(
            self.flags & TYPE_ATTR_VISIBILITY_MASK,
            TYPE_ATTR_PUBLIC | TYPE_ATTR_NESTED_PUBLIC
        )
    }
}

/// The metadata of one loaded assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembly {
    /// Module name from the Module table (usually the file name).
    pub module_name: String,
    /// Module version identifier, hex encoded.
    pub mvid: String,
    /// Every type definition, in table order.
    pub types: Vec<TypeInfo>,
}

/// Metadata of a set of assemblies loaded for inspection only.
#[derive(Debug, Default)]
pub struct ReflectionContext {
    assemblies: Vec<Assembly>,
    loaded: HashSet<String>,
    by_name: HashMap<String, (usize, usize)>,
}

impl ReflectionContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load an assembly from disk.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read, is not a managed PE image, has
    /// malformed metadata, or carries a module identity already loaded here.
    pub fn load_from_path(&mut self, path: &Path) -> Result<&Assembly, ExportError> {
        let bytes = fs::read(path)?;
        let metadata = clr_metadata(&bytes)?;
        let assembly = parse_metadata(metadata)?;
        debug!(path = %path.display(), types = assembly.types.len(), "loaded assembly metadata");
        self.insert(assembly)
    }

    /// Load a bare metadata root (the blob the CLR header points at).
    ///
    /// # Errors
    ///
    /// Fails on malformed metadata or a module identity already loaded here.
    pub fn load_metadata(&mut self, metadata: &[u8]) -> Result<&Assembly, ExportError> {
        let assembly = parse_metadata(metadata)?;
        self.insert(assembly)
    }

    fn insert(&mut self, assembly: Assembly) -> Result<&Assembly, ExportError> {
        if !self.loaded.insert(assembly.mvid.clone()) {
            return Err(ExportError::AlreadyLoaded(assembly.mvid));
        }
        let index = self.assemblies.len();
        for (i, ty) in assembly.types.iter().enumerate() {
            self.by_name.entry(ty.name.full_name()).or_insert((index, i));
        }
        self.assemblies.push(assembly);
        Ok(&self.assemblies[index])
    }

    /// Loaded assemblies in load order.
    pub fn assemblies(&self) -> &[Assembly] {
        &self.assemblies
    }

    /// The first loaded definition of a type, by full name.
    pub fn find_type(&self, full_name: &str) -> Option<&TypeInfo> {
        let &(a, t) = self.by_name.get(full_name)?;
        self.assemblies.get(a).and_then(|asm| asm.types.get(t))
    }
}

/// Locate the metadata root inside a PE image.
fn clr_metadata(bytes: &[u8]) -> Result<&[u8], ExportError> {
    let pe = PE::parse(bytes).map_err(|e| ExportError::Pe(e.to_string()))?;
    let optional = pe
        .header
        .optional_header
        .as_ref()
        .ok_or(ExportError::NotManaged)?;
    let Some(clr) = optional.data_directories.get_clr_runtime_header() else {
        return Err(ExportError::NotManaged);
    };
    if clr.virtual_address == 0 {
        return Err(ExportError::NotManaged);
    }

    let header_offset = rva_to_offset(&pe.sections, clr.virtual_address)?;
    let mut header = Cursor::at(bytes, header_offset + 8)?;
    let metadata_rva = header.u32()?;
    let metadata_size = header.u32()? as usize;

    let start = rva_to_offset(&pe.sections, metadata_rva)?;
    bytes
        .get(start..start + metadata_size)
        .ok_or(ExportError::Malformed("metadata extends past end of file"))
}

fn rva_to_offset(sections: &[SectionTable], rva: u32) -> Result<usize, ExportError> {
    sections
        .iter()
        .find(|s| {
            let start = u64::from(s.virtual_address);
            let size = u64::from(s.virtual_size.max(s.size_of_raw_data));
            (start..start + size).contains(&u64::from(rva))
        })
        .map(|s| (rva - s.virtual_address) as usize + s.pointer_to_raw_data as usize)
        .ok_or(ExportError::Malformed("RVA outside every section"))
}

#[derive(Clone, Copy)]
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn at(data: &'a [u8], pos: usize) -> Result<Self, ExportError> {
        if pos > data.len() {
            return Err(ExportError::Malformed("offset past end of data"));
        }
        Ok(Self { data, pos })
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ExportError> {
        let data = self.data;
        let out = data
            .get(self.pos..self.pos + n)
            .ok_or(ExportError::Malformed("unexpected end of data"))?;
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ExportError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ExportError> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ExportError> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, ExportError> {
        let lo = u64::from(self.u32()?);
        let hi = u64::from(self.u32()?);
        Ok(lo | (hi << 32))
    }

    /// A 2- or 4-byte index column.
    fn index(&mut self, wide: bool) -> Result<u32, ExportError> {
        if wide {
            self.u32()
        } else {
            self.u16().map(u32::from)
        }
    }

    /// ECMA-335 compressed unsigned integer.
    fn compressed(&mut self) -> Result<u32, ExportError> {
        let b0 = u32::from(self.u8()?);
        if b0 & 0x80 == 0 {
            Ok(b0)
        } else if b0 & 0xC0 == 0x80 {
            Ok(((b0 & 0x3F) << 8) | u32::from(self.u8()?))
        } else if b0 & 0xE0 == 0xC0 {
            let rest = self.bytes(3)?;
            Ok(((b0 & 0x1F) << 24)
                | (u32::from(rest[0]) << 16)
                | (u32::from(rest[1]) << 8)
                | u32::from(rest[2]))
        } else {
            Err(ExportError::Malformed("bad compressed integer"))
        }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

struct Heaps<'a> {
    strings: &'a [u8],
    blob: &'a [u8],
    guid: &'a [u8],
}

impl<'a> Heaps<'a> {
    fn string(&self, index: u32) -> Result<String, ExportError> {
        let tail = self
            .strings
            .get(index as usize..)
            .ok_or(ExportError::Malformed("string index out of range"))?;
        let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }

    fn blob(&self, index: u32) -> Result<&'a [u8], ExportError> {
        let mut cur = Cursor::at(self.blob, index as usize)?;
        let len = cur.compressed()? as usize;
        cur.bytes(len)
    }

    fn guid(&self, index: u32) -> Result<&'a [u8], ExportError> {
        if index == 0 {
            return Ok(&[0; 16]);
        }
        let start = (index as usize - 1) * 16;
        self.guid
            .get(start..start + 16)
            .ok_or(ExportError::Malformed("guid index out of range"))
    }
}

struct Tables<'a> {
    data: &'a [u8],
    heap_sizes: u8,
    rows: [u32; 64],
    offsets: [usize; 13],
    row_sizes: [usize; 13],
}

impl<'a> Tables<'a> {
    fn parse(stream: &'a [u8]) -> Result<Self, ExportError> {
        let mut cur = Cursor::at(stream, 0)?;
        cur.u32()?;
        cur.u8()?;
        cur.u8()?;
        let heap_sizes = cur.u8()?;
        cur.u8()?;
        let valid = cur.u64()?;
        cur.u64()?;

        let mut rows = [0u32; 64];
        for (table, count) in rows.iter_mut().enumerate() {
            if valid & (1u64 << table) != 0 {
                *count = cur.u32()?;
            }
        }
        if heap_sizes & 0x40 != 0 {
            cur.u32()?;
        }

        let mut tables = Self {
            data: stream,
            heap_sizes,
            rows,
            offsets: [0; 13],
            row_sizes: [0; 13],
        };
        let mut offset = cur.pos;
        for (table, layout) in LAYOUTS.iter().enumerate() {
            let size: usize = layout.iter().map(|c| tables.col_size(c)).sum();
            tables.row_sizes[table] = size;
            tables.offsets[table] = offset;
            offset += size * tables.rows[table] as usize;
        }
        if offset > stream.len() {
            return Err(ExportError::Malformed("tables extend past table stream"));
        }
        Ok(tables)
    }

    fn col_size(&self, col: &Col) -> usize {
        let wide = |flag: u8| if self.heap_sizes & flag != 0 { 4 } else { 2 };
        match col {
            Col::U8 => 1,
            Col::U16 => 2,
            Col::U32 => 4,
            Col::Str => wide(0x01),
            Col::Guid => wide(0x02),
            Col::Blob => wide(0x04),
            Col::Index(table) => {
                if self.rows[*table] < 0x1_0000 {
                    2
                } else {
                    4
                }
            }
            Col::Coded(coded) => {
                let max = coded
                    .tables
                    .iter()
                    .map(|t| self.rows[*t])
                    .max()
                    .unwrap_or(0);
                if max < (1 << (16 - coded.bits)) { 2 } else { 4 }
            }
        }
    }

    fn len(&self, table: usize) -> u32 {
        self.rows[table]
    }

    /// Column values of a 1-based row.
    fn row(&self, table: usize, row: u32) -> Result<Vec<u32>, ExportError> {
        if row == 0 || row > self.rows[table] {
            return Err(ExportError::Malformed("row index out of range"));
        }
        let start = self.offsets[table] + (row as usize - 1) * self.row_sizes[table];
        let mut cur = Cursor::at(self.data, start)?;
        LAYOUTS[table]
            .iter()
            .map(|col| match col {
                Col::U8 => cur.u8().map(u32::from),
                Col::U16 => cur.u16().map(u32::from),
                Col::U32 => cur.u32(),
                other => {
                    let wide = self.col_size(other) == 4;
                    cur.index(wide)
                }
            })
            .collect()
    }
}

/// Split a coded index into `(tag, row)`.
fn decode_coded(value: u32, coded: &CodedIndex) -> (u32, u32) {
    let mask = (1 << coded.bits) - 1;
    (value & mask, value >> coded.bits)
}

struct Streams<'a> {
    tables: &'a [u8],
    heaps: Heaps<'a>,
}

fn read_streams(metadata: &[u8]) -> Result<Streams<'_>, ExportError> {
    let mut cur = Cursor::at(metadata, 0)?;
    if cur.u32()? != METADATA_SIGNATURE {
        return Err(ExportError::Malformed("bad metadata signature"));
    }
    cur.u16()?;
    cur.u16()?;
    cur.u32()?;
    let version_len = cur.u32()? as usize;
    cur.bytes(version_len)?;
    cur.u16()?;
    let count = cur.u16()?;

    let mut tables = None;
    let mut strings: &[u8] = &[];
    let mut blob: &[u8] = &[];
    let mut guid: &[u8] = &[];
    for _ in 0..count {
        let offset = cur.u32()? as usize;
        let size = cur.u32()? as usize;
        let name_start = cur.pos;
        let name_len = metadata[name_start..]
            .iter()
            .position(|b| *b == 0)
            .ok_or(ExportError::Malformed("unterminated stream name"))?;
        let name = &metadata[name_start..name_start + name_len];
        cur.bytes((name_len + 1).next_multiple_of(4))?;

        let body = metadata
            .get(offset..offset + size)
            .ok_or(ExportError::Malformed("stream extends past metadata"))?;
        match name {
            b"#~" | b"#-" => tables = Some(body),
            b"#Strings" => strings = body,
            b"#Blob" => blob = body,
            b"#GUID" => guid = body,
            _ => {}
        }
    }

    Ok(Streams {
        tables: tables.ok_or(ExportError::Malformed("missing table stream"))?,
        heaps: Heaps {
            strings,
            blob,
            guid,
        },
    })
}

struct RawTypeDef {
    name: TypeName,
    flags: u32,
    extends: u32,
    method_list: u32,
}

/// Parse a metadata root into an [`Assembly`].
///
/// # Errors
///
/// Returns [`ExportError::Malformed`] when any structure is truncated or
/// inconsistent.
pub fn parse_metadata(metadata: &[u8]) -> Result<Assembly, ExportError> {
    let streams = read_streams(metadata)?;
    let heaps = &streams.heaps;
    let tables = Tables::parse(streams.tables)?;

    let (module_name, mvid) = if tables.len(MODULE) > 0 {
        let row = tables.row(MODULE, 1)?;
        (heaps.string(row[1])?, hex::encode(heaps.guid(row[2])?))
    } else {
        return Err(ExportError::Malformed("missing Module table"));
    };

    let type_refs = (1..=tables.len(TYPE_REF))
        .map(|r| {
            let row = tables.row(TYPE_REF, r)?;
            Ok(TypeName::new(heaps.string(row[2])?, heaps.string(row[1])?))
        })
        .collect::<Result<Vec<_>, ExportError>>()?;

    let raw_defs = (1..=tables.len(TYPE_DEF))
        .map(|r| {
            let row = tables.row(TYPE_DEF, r)?;
            Ok(RawTypeDef {
                flags: row[0],
                name: TypeName::new(heaps.string(row[2])?, heaps.string(row[1])?),
                extends: row[3],
                method_list: row[5],
            })
        })
        .collect::<Result<Vec<_>, ExportError>>()?;

    let lookup = |table_row: Option<(usize, u32)>| -> Option<TypeName> {
        match table_row? {
            (TYPE_DEF, r) => raw_defs.get(r.checked_sub(1)? as usize).map(|d| d.name.clone()),
            (TYPE_REF, r) => type_refs.get(r.checked_sub(1)? as usize).cloned(),
            _ => None,
        }
    };

    let mut types: Vec<TypeInfo> = raw_defs
        .iter()
        .map(|def| {
            let (tag, row) = decode_coded(def.extends, &TYPE_DEF_OR_REF);
            let target = TYPE_DEF_OR_REF.tables.get(tag as usize).map(|t| (*t, row));
            TypeInfo {
                name: def.name.clone(),
                flags: def.flags,
                extends: lookup(target),
                attributes: Vec::new(),
            }
        })
        .collect();

    for r in 1..=tables.len(CUSTOM_ATTRIBUTE) {
        let row = tables.row(CUSTOM_ATTRIBUTE, r)?;
        let (parent_tag, parent_row) = decode_coded(row[0], &HAS_CUSTOM_ATTRIBUTE);
        if parent_tag != HAS_CUSTOM_ATTRIBUTE_TYPE_DEF || parent_row == 0 {
            continue;
        }
        let Some(target) = types.get_mut(parent_row as usize - 1) else {
            continue;
        };

        let (ctor_tag, ctor_row) = decode_coded(row[1], &CUSTOM_ATTRIBUTE_TYPE);
        let (attribute_type, signature) = match ctor_tag {
            ATTRIBUTE_CTOR_METHOD_DEF => {
                let method = tables.row(METHOD_DEF, ctor_row)?;
                let owner = raw_defs.partition_point(|d| d.method_list <= ctor_row);
                let name = owner
                    .checked_sub(1)
                    .and_then(|i| raw_defs.get(i))
                    .map(|d| d.name.clone());
                (name, heaps.blob(method[4])?)
            }
            ATTRIBUTE_CTOR_MEMBER_REF => {
                let member = tables.row(MEMBER_REF, ctor_row)?;
                let (tag, parent) = decode_coded(member[0], &MEMBER_REF_PARENT);
                let owner = MEMBER_REF_PARENT.tables.get(tag as usize).map(|t| (*t, parent));
                (lookup(owner), heaps.blob(member[2])?)
            }
            _ => (None, &[][..]),
        };
        let Some(attribute_type) = attribute_type else {
            continue;
        };

        let args = ctor_params(signature)
            .and_then(|params| decode_fixed_args(&params, heaps.blob(row[2])?))
            .unwrap_or_default();
        target.attributes.push(CustomAttribute {
            attribute_type,
            args,
        });
    }

    Ok(Assembly {
        module_name,
        mvid,
        types,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamKind {
    String,
    StringArray,
    /// A primitive of the given encoded width.
    Fixed(usize),
    Unsupported,
}

/// Parameter kinds of a constructor's method signature.
fn ctor_params(signature: &[u8]) -> Result<Vec<ParamKind>, ExportError> {
    let mut cur = Cursor::at(signature, 0)?;
    let conv = cur.u8()?;
    if conv & 0x10 != 0 {
        cur.compressed()?;
    }
    let count = cur.compressed()?;
    if cur.u8()? != 0x01 {
        return Err(ExportError::Malformed("attribute constructor does not return void"));
    }

    // The count comes from the file; every parameter takes at least one byte.
    if count as usize > signature.len() {
        return Err(ExportError::Malformed("constructor parameter count exceeds signature"));
    }
    let mut params = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let kind = match cur.u8()? {
            0x0E => ParamKind::String,
            0x1D if cur.u8()? == 0x0E => ParamKind::StringArray,
            0x02 | 0x04 | 0x05 => ParamKind::Fixed(1),
            0x03 | 0x06 | 0x07 => ParamKind::Fixed(2),
            0x08 | 0x09 | 0x0C => ParamKind::Fixed(4),
            0x0A | 0x0B | 0x0D => ParamKind::Fixed(8),
            _ => ParamKind::Unsupported,
        };
        params.push(kind);
        // Later parameters cannot be located past a type of unknown width.
        if kind == ParamKind::Unsupported {
            break;
        }
    }
    Ok(params)
}

/// Decode the fixed arguments of an attribute value blob. Decoding stops at
/// the first argument whose width is unknown.
fn decode_fixed_args(params: &[ParamKind], blob: &[u8]) -> Result<Vec<AttrArg>, ExportError> {
    let mut cur = Cursor::at(blob, 0)?;
    if cur.u16()? != 0x0001 {
        return Err(ExportError::Malformed("bad custom attribute prolog"));
    }
    let mut args = Vec::with_capacity(params.len());
    for param in params {
        match param {
            ParamKind::String => args.push(AttrArg::String(ser_string(&mut cur)?)),
            ParamKind::StringArray => {
                let count = cur.u32()?;
                if count == u32::MAX {
                    args.push(AttrArg::StringArray(None));
                } else {
                    let items = (0..count)
                        .map(|_| ser_string(&mut cur).map(Option::unwrap_or_default))
                        .collect::<Result<Vec<_>, _>>()?;
                    args.push(AttrArg::StringArray(Some(items)));
                }
            }
            ParamKind::Fixed(width) => {
                cur.bytes(*width)?;
                args.push(AttrArg::Other);
            }
            ParamKind::Unsupported => {
                args.push(AttrArg::Other);
                break;
            }
        }
    }
    Ok(args)
}

fn ser_string(cur: &mut Cursor<'_>) -> Result<Option<String>, ExportError> {
    if cur.is_empty() {
        return Err(ExportError::Malformed("truncated attribute string"));
    }
    if cur.data[cur.pos] == 0xFF {
        cur.pos += 1;
        return Ok(None);
    }
    let len = cur.compressed()? as usize;
    Ok(Some(String::from_utf8_lossy(cur.bytes(len)?).into_owned()))
}

/// In-memory builder of metadata roots for tests.
#[cfg(test)]
pub(crate) mod fixture {
    /// Constructor parameter types understood by the builder.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Param {
        String,
        StringArray,
        Int,
    }

    /// Fixed constructor argument values.
    #[derive(Debug, Clone)]
    pub(crate) enum Arg<'a> {
        Str(&'a str),
        Null,
        Strs(&'a [&'a str]),
        Int(i32),
    }

    /// Base type of a defined type.
    #[derive(Debug, Clone, Copy)]
    pub(crate) enum Extends {
        None,
        Def(u16),
        Ref(u16),
    }

    pub(crate) const PUBLIC: u32 = 0x0010_0001;
    pub(crate) const PUBLIC_ABSTRACT: u32 = 0x0010_0081;

    /// Builds a metadata root with 2-byte heap and table indexes.
    #[derive(Debug)]
    pub(crate) struct MetadataBuilder {
        strings: Vec<u8>,
        blob: Vec<u8>,
        mvid: [u8; 16],
        type_refs: Vec<[u16; 3]>,
        type_defs: Vec<(u32, [u16; 5])>,
        methods: Vec<[u16; 3]>,
        member_refs: Vec<[u16; 3]>,
        attributes: Vec<[u16; 3]>,
    }

    impl MetadataBuilder {
        pub(crate) fn new(mvid: u8) -> Self {
            let mut builder = Self {
                strings: vec![0],
                blob: vec![0],
                mvid: [mvid; 16],
                type_refs: Vec::new(),
                type_defs: Vec::new(),
                methods: Vec::new(),
                member_refs: Vec::new(),
                attributes: Vec::new(),
            };
            builder.type_def(0, "", "<Module>", Extends::None);
            builder
        }

        fn string(&mut self, s: &str) -> u16 {
            if s.is_empty() {
                return 0;
            }
            let index = self.strings.len() as u16;
            self.strings.extend_from_slice(s.as_bytes());
            self.strings.push(0);
            index
        }

        fn blob(&mut self, bytes: &[u8]) -> u16 {
            let index = self.blob.len() as u16;
            self.blob.push(bytes.len() as u8);
            self.blob.extend_from_slice(bytes);
            index
        }

        /// Add a type reference; returns its 1-based row.
        pub(crate) fn type_ref(&mut self, namespace: &str, name: &str) -> u16 {
            let name = self.string(name);
            let namespace = self.string(namespace);
            // ResolutionScope: AssemblyRef row 1.
            self.type_refs.push([(1 << 2) | 2, name, namespace]);
            self.type_refs.len() as u16
        }

        /// Add a type definition; methods added next belong to it.
        pub(crate) fn type_def(
            &mut self,
            flags: u32,
            namespace: &str,
            name: &str,
            extends: Extends,
        ) -> u16 {
            let name = self.string(name);
            let namespace = self.string(namespace);
            let extends = match extends {
                Extends::None => 0,
                Extends::Def(row) => row << 2,
                Extends::Ref(row) => (row << 2) | 1,
            };
            let method_list = self.methods.len() as u16 + 1;
            self.type_defs
                .push((flags, [name, namespace, extends, 1, method_list]));
            self.type_defs.len() as u16
        }

        fn signature(params: &[Param]) -> Vec<u8> {
            let mut sig = vec![0x20, params.len() as u8, 0x01];
            for p in params {
                match p {
                    Param::String => sig.push(0x0E),
                    Param::StringArray => sig.extend_from_slice(&[0x1D, 0x0E]),
                    Param::Int => sig.push(0x08),
                }
            }
            sig
        }

        /// Add a constructor definition to the last defined type.
        pub(crate) fn ctor_def(&mut self, params: &[Param]) -> u16 {
            let name = self.string(".ctor");
            let sig = self.blob(&Self::signature(params));
            self.methods.push([0x1886, name, sig]);
            self.methods.len() as u16
        }

        /// Add a constructor reference on a referenced type.
        pub(crate) fn ctor_ref(&mut self, type_ref: u16, params: &[Param]) -> u16 {
            let name = self.string(".ctor");
            let sig = self.blob(&Self::signature(params));
            self.member_refs.push([(type_ref << 3) | 1, name, sig]);
            self.member_refs.len() as u16
        }

        fn value(args: &[Arg<'_>]) -> Vec<u8> {
            fn ser(out: &mut Vec<u8>, s: &str) {
                out.push(s.len() as u8);
                out.extend_from_slice(s.as_bytes());
            }
            let mut out = vec![0x01, 0x00];
            for arg in args {
                match arg {
                    Arg::Str(s) => ser(&mut out, s),
                    Arg::Null => out.push(0xFF),
                    Arg::Strs(items) => {
                        out.extend_from_slice(&(items.len() as u32).to_le_bytes());
                        for s in *items {
                            ser(&mut out, s);
                        }
                    }
                    Arg::Int(i) => out.extend_from_slice(&i.to_le_bytes()),
                }
            }
            out.extend_from_slice(&[0, 0]);
            out
        }

        /// Apply an attribute whose constructor is a member reference.
        pub(crate) fn attribute_ref(&mut self, type_def: u16, member_ref: u16, args: &[Arg<'_>]) {
            let value = self.blob(&Self::value(args));
            self.attributes
                .push([(type_def << 5) | 3, (member_ref << 3) | 3, value]);
        }

        /// Apply an attribute whose constructor is defined locally.
        pub(crate) fn attribute_def(&mut self, type_def: u16, method: u16, args: &[Arg<'_>]) {
            let value = self.blob(&Self::value(args));
            self.attributes
                .push([(type_def << 5) | 3, (method << 3) | 2, value]);
        }

        fn table_stream(&mut self) -> Vec<u8> {
            let module_name = self.string("Fixture.dll");
            let mut present: Vec<(usize, u32)> = vec![(0x00, 1)];
            for (table, rows) in [
                (0x01, self.type_refs.len()),
                (0x02, self.type_defs.len()),
                (0x06, self.methods.len()),
                (0x0A, self.member_refs.len()),
                (0x0C, self.attributes.len()),
            ] {
                if rows > 0 {
                    present.push((table, rows as u32));
                }
            }

            let mut out = Vec::new();
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&[2, 0, 0, 1]);
            let valid = present.iter().fold(0u64, |acc, (t, _)| acc | (1 << t));
            out.extend_from_slice(&valid.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes());
            for (_, rows) in &present {
                out.extend_from_slice(&rows.to_le_bytes());
            }

            fn push16(out: &mut Vec<u8>, v: u16) {
                out.extend_from_slice(&v.to_le_bytes());
            }
            // Module
            for v in [0, module_name, 1, 0, 0] {
                push16(&mut out, v);
            }
            for row in &self.type_refs {
                row.iter().for_each(|v| push16(&mut out, *v));
            }
            for (flags, cols) in &self.type_defs {
                out.extend_from_slice(&flags.to_le_bytes());
                cols.iter().for_each(|v| push16(&mut out, *v));
            }
            for [flags, name, sig] in &self.methods {
                out.extend_from_slice(&0u32.to_le_bytes());
                push16(&mut out, 0);
                for v in [*flags, *name, *sig, 1] {
                    push16(&mut out, v);
                }
            }
            for row in self.member_refs.iter().chain(&self.attributes) {
                row.iter().for_each(|v| push16(&mut out, *v));
            }
            out
        }

        /// Serialize the metadata root.
        pub(crate) fn build(mut self) -> Vec<u8> {
            fn pad(mut v: Vec<u8>) -> Vec<u8> {
                v.resize(v.len().next_multiple_of(4), 0);
                v
            }
            let tables = pad(self.table_stream());
            let streams: [(&[u8], Vec<u8>); 4] = [
                (&b"#~"[..], tables),
                (&b"#Strings"[..], pad(self.strings.clone())),
                (&b"#Blob"[..], pad(self.blob.clone())),
                (&b"#GUID"[..], self.mvid.to_vec()),
            ];

            let version = b"v4.0.30319\0\0";
            let headers_len: usize = streams
                .iter()
                .map(|(name, _)| 8 + (name.len() + 1).next_multiple_of(4))
                .sum();
            let mut offset = 16 + version.len() + 4 + headers_len;

            let mut out = Vec::new();
            out.extend_from_slice(&0x424A_5342u32.to_le_bytes());
            out.extend_from_slice(&[1, 0, 1, 0, 0, 0, 0, 0]);
            out.extend_from_slice(&(version.len() as u32).to_le_bytes());
            out.extend_from_slice(version);
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&(streams.len() as u16).to_le_bytes());
            for (name, body) in &streams {
                out.extend_from_slice(&(offset as u32).to_le_bytes());
                out.extend_from_slice(&(body.len() as u32).to_le_bytes());
                let mut padded = name.to_vec();
                padded.resize((name.len() + 1).next_multiple_of(4), 0);
                out.extend_from_slice(&padded);
                offset += body.len();
            }
            for (_, body) in &streams {
                out.extend_from_slice(body);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::*;
    use super::*;

    fn sample() -> Vec<u8> {
        let mut b = MetadataBuilder::new(7);
        let attr = b.type_ref("System.Management.Automation", "CmdletAttribute");
        let alias = b.type_ref("System.Management.Automation", "AliasAttribute");
        let base = b.type_ref("System.Management.Automation", "PSCmdlet");
        let cmdlet_ctor = b.ctor_ref(attr, &[Param::String, Param::String]);
        let alias_ctor = b.ctor_ref(alias, &[Param::StringArray]);

        let widget = b.type_def(PUBLIC, "Contoso.Commands", "GetWidgetCommand", Extends::Ref(base));
        b.attribute_ref(widget, cmdlet_ctor, &[Arg::Str("Get"), Arg::Str("Widget")]);
        b.attribute_ref(widget, alias_ctor, &[Arg::Strs(&["gw", "gwid"])]);

        b.type_def(PUBLIC, "Contoso", "Derived", Extends::Def(widget));
        b.build()
    }

    #[test]
    fn test_parse_types_and_base_names() {
        let asm = parse_metadata(&sample()).unwrap();
        assert_eq!(asm.module_name, "Fixture.dll");
        assert_eq!(asm.mvid, "07".repeat(16));

        let names: Vec<String> = asm.types.iter().map(|t| t.name.full_name()).collect();
        assert_eq!(
            names,
            vec![
                "<Module>",
                "Contoso.Commands.GetWidgetCommand",
                "Contoso.Derived"
            ]
        );
        let widget = &asm.types[1];
        assert!(widget.is_public());
        assert!(!widget.is_abstract());
        assert_eq!(
            widget.extends.as_ref().map(TypeName::full_name).as_deref(),
            Some("System.Management.Automation.PSCmdlet")
        );
        assert_eq!(
            asm.types[2].extends.as_ref().map(TypeName::full_name).as_deref(),
            Some("Contoso.Commands.GetWidgetCommand")
        );
    }

    #[test]
    fn test_decode_attribute_arguments() {
        let asm = parse_metadata(&sample()).unwrap();
        let widget = &asm.types[1];

        let named = |full: &str| -> Vec<&CustomAttribute> {
            widget
                .attributes
                .iter()
                .filter(|a| a.attribute_type.full_name() == full)
                .collect()
        };
        let cmdlet = named("System.Management.Automation.CmdletAttribute");
        assert_eq!(cmdlet.len(), 1);
        assert_eq!(
            cmdlet[0].args,
            vec![
                AttrArg::String(Some("Get".to_string())),
                AttrArg::String(Some("Widget".to_string()))
            ]
        );
        let alias = named("System.Management.Automation.AliasAttribute");
        assert_eq!(alias[0].string_values(), vec!["gw", "gwid"]);
        assert!(asm.types[2].attributes.is_empty());
    }

    #[test]
    fn test_local_constructor_resolves_owner() {
        let mut b = MetadataBuilder::new(1);
        b.type_def(PUBLIC, "Contoso", "TagAttribute", Extends::None);
        let ctor = b.ctor_def(&[Param::Int, Param::String]);
        let target = b.type_def(PUBLIC, "Contoso", "Tagged", Extends::None);
        b.attribute_def(target, ctor, &[Arg::Int(3), Arg::Null]);

        let asm = parse_metadata(&b.build()).unwrap();
        let attrs = &asm.types[2].attributes;
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].attribute_type.full_name(), "Contoso.TagAttribute");
        assert_eq!(attrs[0].args, vec![AttrArg::Other, AttrArg::String(None)]);
    }

    #[test]
    fn test_context_rejects_duplicate_module_identity() {
        let mut ctx = ReflectionContext::new();
        ctx.load_metadata(&sample()).unwrap();
        let err = ctx.load_metadata(&sample()).unwrap_err();
        assert!(matches!(err, ExportError::AlreadyLoaded(_)));
        assert_eq!(ctx.assemblies().len(), 1);
        assert!(ctx.find_type("Contoso.Derived").is_some());
        assert!(ctx.find_type("Contoso.Missing").is_none());
    }

    #[test]
    fn test_truncated_metadata_is_malformed() {
        let bytes = sample();
        assert!(matches!(
            parse_metadata(&bytes[..bytes.len() / 2]),
            Err(ExportError::Malformed(_))
        ));
        assert!(matches!(
            parse_metadata(b"not metadata at all"),
            Err(ExportError::Malformed(_))
        ));
    }

    #[test]
    fn test_non_pe_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Not.dll");
        fs::write(&path, b"plain text, not an image").unwrap();
        let mut ctx = ReflectionContext::new();
        assert!(matches!(ctx.load_from_path(&path), Err(ExportError::Pe(_))));
    }

    #[test]
    fn test_type_name_rendering() {
        let name = TypeName::new("System.Management.Automation", "Cmdlet");
        assert_eq!(name.full_name(), "System.Management.Automation.Cmdlet");
        assert_eq!(TypeName::new("", "Global").full_name(), "Global");
    }

    #[test]
    fn test_oversized_parameter_count_is_malformed() {
        // HASTHIS, count 0x1FFFFFFF, void return.
        let signature = [0x20, 0xDF, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(matches!(ctor_params(&signature), Err(ExportError::Malformed(_))));

        // A count that fits but runs past the end fails on the read instead.
        let short = [0x20, 0x03, 0x01, 0x0E];
        assert!(ctor_params(&short).is_err());

        let two_strings = [0x20, 0x02, 0x01, 0x0E, 0x0E];
        assert_eq!(
            ctor_params(&two_strings).unwrap(),
            vec![ParamKind::String, ParamKind::String]
        );
    }
}
