//! Class-file symbol rewriting.
//!
//! The rewriter renames constant-pool symbols in place: class constants,
//! member names referenced through name-and-type entries or declared in the
//! field/method tables, and class names embedded in descriptors. Pool indices
//! are never renumbered, so attribute payloads can be carried through
//! verbatim. Generic signature attributes keep their original names; the
//! target environment's loader resolves erased names only.
//!
//! Access directives are matched against development-scheme names regardless
//! of direction: after renaming when deobfuscating, before renaming when
//! reobfuscating.

use thiserror::Error;

use crate::access::AccessDirectiveSet;
use crate::mapping::{Direction, MappingTable};
use crate::RemapError;

const MAGIC: u32 = 0xCAFE_BABE;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_PRIVATE: u16 = 0x0002;
const ACC_PROTECTED: u16 = 0x0004;
const ACC_FINAL: u16 = 0x0010;

/// Errors from parsing or rewriting a class file
#[derive(Debug, Error)]
pub enum ClassError {
    #[error("unexpected end of class file at offset {0}")]
    UnexpectedEof(usize),

    #[error("bad class file magic {0:#010x}")]
    BadMagic(u32),

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstTag { tag: u8, index: usize },

    #[error("constant pool index {0} out of range")]
    BadPoolIndex(u16),

    #[error("constant pool index {0} is not the expected kind")]
    WrongPoolKind(u16),

    #[error("name {0:?} is used as both a field and a method with diverging mappings")]
    AmbiguousMember(String),
}

#[derive(Debug, Clone)]
enum Const {
    Utf8(Vec<u8>),
    Integer([u8; 4]),
    Float([u8; 4]),
    Long([u8; 8]),
    Double([u8; 8]),
    Class(u16),
    Str(u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
    InterfaceMethodRef(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
    /// Index 0 and the filler slot after eight-byte constants
    Slot,
}

#[derive(Debug, Clone)]
struct Member {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    /// Attribute table bytes, including the leading count
    raw_attributes: Vec<u8>,
}

#[derive(Debug, Clone)]
struct ClassFile {
    minor: u16,
    major: u16,
    pool: Vec<Const>,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<Member>,
    methods: Vec<Member>,
    /// Class attribute table bytes, including the leading count
    raw_attributes: Vec<u8>,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ClassError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(ClassError::UnexpectedEof(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClassError> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassError> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassError> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

fn push_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

impl ClassFile {
    fn parse(bytes: &[u8]) -> Result<Self, ClassError> {
        let mut r = Reader::new(bytes);

        let magic = r.u32()?;
        if magic != MAGIC {
            return Err(ClassError::BadMagic(magic));
        }
        let minor = r.u16()?;
        let major = r.u16()?;

        let pool_count = r.u16()? as usize;
        let mut pool = Vec::with_capacity(pool_count);
        pool.push(Const::Slot);
        let mut index = 1;
        while index < pool_count {
            let tag = r.u8()?;
            let (constant, slots) = match tag {
                1 => {
                    let len = r.u16()? as usize;
                    (Const::Utf8(r.bytes(len)?.to_vec()), 1)
                }
                3 => (Const::Integer(r.bytes(4)?.try_into().unwrap()), 1),
                4 => (Const::Float(r.bytes(4)?.try_into().unwrap()), 1),
                5 => (Const::Long(r.bytes(8)?.try_into().unwrap()), 2),
                6 => (Const::Double(r.bytes(8)?.try_into().unwrap()), 2),
                7 => (Const::Class(r.u16()?), 1),
                8 => (Const::Str(r.u16()?), 1),
                9 => (Const::FieldRef(r.u16()?, r.u16()?), 1),
                10 => (Const::MethodRef(r.u16()?, r.u16()?), 1),
                11 => (Const::InterfaceMethodRef(r.u16()?, r.u16()?), 1),
                12 => (Const::NameAndType(r.u16()?, r.u16()?), 1),
                15 => (Const::MethodHandle(r.u8()?, r.u16()?), 1),
                16 => (Const::MethodType(r.u16()?), 1),
                17 => (Const::Dynamic(r.u16()?, r.u16()?), 1),
                18 => (Const::InvokeDynamic(r.u16()?, r.u16()?), 1),
                19 => (Const::Module(r.u16()?), 1),
                20 => (Const::Package(r.u16()?), 1),
                tag => return Err(ClassError::UnknownConstTag { tag, index }),
            };
            pool.push(constant);
            if slots == 2 {
                pool.push(Const::Slot);
            }
            index += slots;
        }

        let access = r.u16()?;
        let this_class = r.u16()?;
        let super_class = r.u16()?;

        let interface_count = r.u16()? as usize;
        let mut interfaces = Vec::with_capacity(interface_count);
        for _ in 0..interface_count {
            interfaces.push(r.u16()?);
        }

        let fields = Self::parse_members(&mut r)?;
        let methods = Self::parse_members(&mut r)?;
        let raw_attributes = Self::read_raw_attributes(&mut r)?;

        Ok(Self {
            minor,
            major,
            pool,
            access,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            raw_attributes,
        })
    }

    fn parse_members(r: &mut Reader<'_>) -> Result<Vec<Member>, ClassError> {
        let count = r.u16()? as usize;
        let mut members = Vec::with_capacity(count);
        for _ in 0..count {
            let access = r.u16()?;
            let name_index = r.u16()?;
            let descriptor_index = r.u16()?;
            let raw_attributes = Self::read_raw_attributes(r)?;
            members.push(Member {
                access,
                name_index,
                descriptor_index,
                raw_attributes,
            });
        }
        Ok(members)
    }

    fn read_raw_attributes(r: &mut Reader<'_>) -> Result<Vec<u8>, ClassError> {
        let start = r.pos;
        let count = r.u16()?;
        for _ in 0..count {
            let _name = r.u16()?;
            let len = r.u32()? as usize;
            r.bytes(len)?;
        }
        Ok(r.buf[start..r.pos].to_vec())
    }

    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_u32(&mut out, MAGIC);
        push_u16(&mut out, self.minor);
        push_u16(&mut out, self.major);

        push_u16(&mut out, self.pool.len() as u16);
        for constant in self.pool.iter().skip(1) {
            match constant {
                Const::Utf8(bytes) => {
                    out.push(1);
                    push_u16(&mut out, bytes.len() as u16);
                    out.extend_from_slice(bytes);
                }
                Const::Integer(b) => {
                    out.push(3);
                    out.extend_from_slice(b);
                }
                Const::Float(b) => {
                    out.push(4);
                    out.extend_from_slice(b);
                }
                Const::Long(b) => {
                    out.push(5);
                    out.extend_from_slice(b);
                }
                Const::Double(b) => {
                    out.push(6);
                    out.extend_from_slice(b);
                }
                Const::Class(i) => {
                    out.push(7);
                    push_u16(&mut out, *i);
                }
                Const::Str(i) => {
                    out.push(8);
                    push_u16(&mut out, *i);
                }
                Const::FieldRef(a, b) => {
                    out.push(9);
                    push_u16(&mut out, *a);
                    push_u16(&mut out, *b);
                }
                Const::MethodRef(a, b) => {
                    out.push(10);
                    push_u16(&mut out, *a);
                    push_u16(&mut out, *b);
                }
                Const::InterfaceMethodRef(a, b) => {
                    out.push(11);
                    push_u16(&mut out, *a);
                    push_u16(&mut out, *b);
                }
                Const::NameAndType(a, b) => {
                    out.push(12);
                    push_u16(&mut out, *a);
                    push_u16(&mut out, *b);
                }
                Const::MethodHandle(kind, i) => {
                    out.push(15);
                    out.push(*kind);
                    push_u16(&mut out, *i);
                }
                Const::MethodType(i) => {
                    out.push(16);
                    push_u16(&mut out, *i);
                }
                Const::Dynamic(a, b) => {
                    out.push(17);
                    push_u16(&mut out, *a);
                    push_u16(&mut out, *b);
                }
                Const::InvokeDynamic(a, b) => {
                    out.push(18);
                    push_u16(&mut out, *a);
                    push_u16(&mut out, *b);
                }
                Const::Module(i) => {
                    out.push(19);
                    push_u16(&mut out, *i);
                }
                Const::Package(i) => {
                    out.push(20);
                    push_u16(&mut out, *i);
                }
                Const::Slot => {}
            }
        }

        push_u16(&mut out, self.access);
        push_u16(&mut out, self.this_class);
        push_u16(&mut out, self.super_class);

        push_u16(&mut out, self.interfaces.len() as u16);
        for i in &self.interfaces {
            push_u16(&mut out, *i);
        }

        for members in [&self.fields, &self.methods] {
            push_u16(&mut out, members.len() as u16);
            for member in members.iter() {
                push_u16(&mut out, member.access);
                push_u16(&mut out, member.name_index);
                push_u16(&mut out, member.descriptor_index);
                out.extend_from_slice(&member.raw_attributes);
            }
        }

        out.extend_from_slice(&self.raw_attributes);
        out
    }

    fn utf8(&self, index: u16) -> Result<&str, ClassError> {
        match self.pool.get(index as usize) {
            Some(Const::Utf8(bytes)) => {
                std::str::from_utf8(bytes).map_err(|_| ClassError::WrongPoolKind(index))
            }
            Some(_) => Err(ClassError::WrongPoolKind(index)),
            None => Err(ClassError::BadPoolIndex(index)),
        }
    }

    fn class_name(&self, class_index: u16) -> Result<&str, ClassError> {
        match self.pool.get(class_index as usize) {
            Some(Const::Class(name_index)) => self.utf8(*name_index),
            Some(_) => Err(ClassError::WrongPoolKind(class_index)),
            None => Err(ClassError::BadPoolIndex(class_index)),
        }
    }
}

fn apply_level(flags: u16, level: crate::AccessLevel, strip_final: bool) -> u16 {
    let mut out = flags & !(ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED);
    out |= match level {
        crate::AccessLevel::Public => ACC_PUBLIC,
        crate::AccessLevel::Protected => ACC_PROTECTED,
        crate::AccessLevel::Private => ACC_PRIVATE,
    };
    if strip_final {
        out &= !ACC_FINAL;
    }
    out
}

/// Rewrites class files and entry paths for one remap direction.
///
/// Constructed from the shared mapping table; the reobfuscation direction
/// inverts the table up front so both directions cannot drift.
pub struct Remapper {
    table: MappingTable,
    direction: Direction,
    directives: AccessDirectiveSet,
}

impl Remapper {
    pub fn new(
        table: &MappingTable,
        direction: Direction,
        directives: &AccessDirectiveSet,
    ) -> Result<Self, RemapError> {
        let oriented = match direction {
            Direction::Deobfuscate => table.clone(),
            Direction::Reobfuscate => table.invert()?,
        };
        Ok(Self {
            table: oriented,
            direction,
            directives: directives.clone(),
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Whether an archive entry is a class file the rewriter handles
    pub fn is_class_entry(path: &str) -> bool {
        path.ends_with(".class")
    }

    /// Remap an archive entry path. Non-class entries pass through.
    pub fn remap_entry_path(&self, path: &str) -> String {
        match path.strip_suffix(".class") {
            Some(stem) => format!("{}.class", self.table.map_class(stem)),
            None => path.to_string(),
        }
    }

    /// Rewrite one class file
    pub fn remap_class(&self, bytes: &[u8]) -> Result<Vec<u8>, ClassError> {
        let mut class = ClassFile::parse(bytes)?;

        // Development-scheme name for directive matching
        let this_name = class.class_name(class.this_class)?.to_string();
        let dev_class = match self.direction {
            Direction::Deobfuscate => self.table.map_class(&this_name).to_string(),
            Direction::Reobfuscate => this_name.clone(),
        };

        // Member names as declared, captured before any pool rewriting
        let field_names: Vec<String> = class
            .fields
            .iter()
            .map(|f| class.utf8(f.name_index).map(str::to_string))
            .collect::<Result<_, _>>()?;
        let method_names: Vec<String> = class
            .methods
            .iter()
            .map(|m| class.utf8(m.name_index).map(str::to_string))
            .collect::<Result<_, _>>()?;

        self.rewrite_pool(&mut class)?;
        self.apply_directives(&mut class, &dev_class, &field_names, &method_names);

        Ok(class.serialize())
    }

    /// Classify every Utf8 slot by how the pool and member tables use it,
    /// then rewrite each according to its role.
    fn rewrite_pool(&self, class: &mut ClassFile) -> Result<(), ClassError> {
        let n = class.pool.len();
        let mut is_class_name = vec![false; n];
        let mut is_field_name = vec![false; n];
        let mut is_method_name = vec![false; n];
        let mut is_descriptor = vec![false; n];
        let mut nat_field = vec![false; n];
        let mut nat_method = vec![false; n];

        // Out-of-range indices mean a corrupt pool; marking skips them and
        // the slot is left untouched rather than panicking.
        fn mark(flags: &mut [bool], index: u16) {
            if let Some(slot) = flags.get_mut(index as usize) {
                *slot = true;
            }
        }

        for constant in &class.pool {
            match constant {
                Const::Class(name) => mark(&mut is_class_name, *name),
                Const::MethodType(desc) => mark(&mut is_descriptor, *desc),
                Const::FieldRef(_, nat) => mark(&mut nat_field, *nat),
                Const::MethodRef(_, nat) | Const::InterfaceMethodRef(_, nat) => {
                    mark(&mut nat_method, *nat)
                }
                // Invoked names resolve like method names; the dynamic
                // constant's name is bootstrap-defined and stays put.
                Const::InvokeDynamic(_, nat) => mark(&mut nat_method, *nat),
                Const::Dynamic(_, nat) => {
                    if let Some(Const::NameAndType(_, desc)) = class.pool.get(*nat as usize) {
                        mark(&mut is_descriptor, *desc);
                    }
                }
                _ => {}
            }
        }

        for (index, constant) in class.pool.iter().enumerate() {
            if let Const::NameAndType(name, desc) = constant {
                mark(&mut is_descriptor, *desc);
                if nat_field[index] {
                    mark(&mut is_field_name, *name);
                }
                if nat_method[index] {
                    mark(&mut is_method_name, *name);
                }
            }
        }

        for field in &class.fields {
            mark(&mut is_field_name, field.name_index);
            mark(&mut is_descriptor, field.descriptor_index);
        }
        for method in &class.methods {
            mark(&mut is_method_name, method.name_index);
            mark(&mut is_descriptor, method.descriptor_index);
        }

        for index in 1..n {
            let text = match &class.pool[index] {
                Const::Utf8(bytes) => match std::str::from_utf8(bytes) {
                    Ok(s) => s.to_string(),
                    Err(_) => continue,
                },
                _ => continue,
            };

            let member_name = is_field_name[index] || is_method_name[index];
            let replacement = if is_class_name[index] {
                self.table.map_class_constant(&text)
            } else if member_name && is_descriptor[index] {
                // One slot serving as both a member name and a descriptor
                // cannot be rewritten safely; leave it untouched.
                continue;
            } else if is_field_name[index] && is_method_name[index] {
                let as_field = self.table.map_field(&text);
                let as_method = self.table.map_method(&text);
                if as_field != as_method {
                    return Err(ClassError::AmbiguousMember(text));
                }
                as_field.to_string()
            } else if is_field_name[index] {
                self.table.map_field(&text).to_string()
            } else if is_method_name[index] {
                self.table.map_method(&text).to_string()
            } else if is_descriptor[index] {
                self.table.map_descriptor(&text)
            } else {
                continue;
            };

            if replacement != text {
                class.pool[index] = Const::Utf8(replacement.into_bytes());
            }
        }

        Ok(())
    }

    fn apply_directives(
        &self,
        class: &mut ClassFile,
        dev_class: &str,
        field_names: &[String],
        method_names: &[String],
    ) {
        // Member directive matching also uses development-scheme names
        let dev_member = |name: &str, field: bool| -> String {
            match self.direction {
                Direction::Deobfuscate => {
                    if field {
                        self.table.map_field(name).to_string()
                    } else {
                        self.table.map_method(name).to_string()
                    }
                }
                Direction::Reobfuscate => name.to_string(),
            }
        };

        for directive in self.directives.directives() {
            if directive.targets_class(dev_class) {
                class.access = apply_level(class.access, directive.level, directive.strip_final);
            }

            for (field, name) in class.fields.iter_mut().zip(field_names) {
                if directive.targets_member(dev_class, &dev_member(name, true)) {
                    field.access = apply_level(field.access, directive.level, directive.strip_final);
                }
            }
            for (method, name) in class.methods.iter_mut().zip(method_names) {
                if directive.targets_member(dev_class, &dev_member(name, false)) {
                    method.access =
                        apply_level(method.access, directive.level, directive.strip_final);
                }
            }
        }
    }
}
