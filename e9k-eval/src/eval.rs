use e9k_common::{mask24, read_be};
use e9k_debuginfo::types::{TypeKind, TypeId};
use e9k_debuginfo::{resolve_local, DebugIndex, LocalPlace};

use crate::machine::Machine;
use crate::value::{Place, Value};
use crate::{EvalError, EvalErrorKind};

/// Evaluates `expr` against the index and the machine.
///
/// With `type_only` set, the same grammar is walked but no emulator state
/// is read and the resulting [`Value`] carries only a type; this is what
/// member completion uses on partial expressions.
pub fn evaluate(
    expr: &str,
    index: &mut DebugIndex,
    machine: &dyn Machine,
    type_only: bool,
) -> Result<Value, EvalError> {
    let mut parser = Parser {
        text: expr,
        pos: 0,
        index,
        machine,
        type_only,
    };
    let value = parser.parse_expr()?;
    parser.skip_ws();
    if parser.pos != parser.text.len() {
        return Err(EvalError::new(
            EvalErrorKind::Parse,
            format!("unexpected input at '{}'", &parser.text[parser.pos..]),
        ));
    }
    Ok(value)
}

/// Resolves an expression to `(address, byte_size)` for the `write`
/// command. Fails for values without an address.
pub fn resolve_address(
    expr: &str,
    index: &mut DebugIndex,
    machine: &dyn Machine,
) -> Result<(u32, usize), EvalError> {
    let value = evaluate(expr, index, machine, false)?;
    let addr = value
        .address()
        .ok_or_else(|| EvalError::new(EvalErrorKind::Resolution, format!("'{expr}' has no address")))?;
    let size = value
        .type_id
        .map(|id| index.types.resolved(id).size_or(4))
        .unwrap_or(4);
    Ok((addr, size))
}

/// Reads a big-endian scalar from guest memory.
pub(crate) fn read_unsigned(machine: &dyn Machine, addr: u32, size: usize) -> Option<u64> {
    let mut buf = [0u8; 8];
    let size = size.clamp(1, 8);
    if !machine.read_memory(addr, &mut buf[..size]) {
        return None;
    }
    read_be(&buf, size)
}

struct Parser<'a, 'm> {
    text: &'a str,
    pos: usize,
    index: &'a mut DebugIndex,
    machine: &'m dyn Machine,
    type_only: bool,
}

impl<'a, 'm> Parser<'a, 'm> {
    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.text.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), EvalError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(EvalError::new(
                EvalErrorKind::Parse,
                format!("expected '{token}'"),
            ))
        }
    }

    fn parse_expr(&mut self) -> Result<Value, EvalError> {
        self.parse_postfix()
    }

    fn parse_ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let rest = self.rest();
        let mut chars = rest.char_indices();
        match chars.next() {
            Some((_, c)) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return None,
        }
        let end = rest
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(rest.len());
        self.pos += end;
        Some(&rest[..end])
    }

    fn parse_number(&mut self) -> Option<u64> {
        self.skip_ws();
        let rest = self.rest();
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
        let (digits, radix) = if rest.starts_with("0x") || rest.starts_with("0X") {
            (&rest[2..], 16)
        } else {
            (rest, 10)
        };
        let end = if radix == 16 {
            digits.find(|c: char| !c.is_ascii_hexdigit())
        } else {
            digits.find(|c: char| !c.is_ascii_digit())
        }
        .unwrap_or(digits.len());
        if end == 0 {
            return None;
        }
        let value = u64::from_str_radix(&digits[..end], radix).ok()?;
        self.pos += rest.len() - digits.len() + end;
        Some(value)
    }

    fn default_u32(&mut self) -> Option<TypeId> {
        Some(self.index.types.default_unsigned(4))
    }

    /// Reads the pointer stored in `value`.
    fn read_pointer(&mut self, value: &Value) -> Result<u32, EvalError> {
        match value.place {
            Place::Immediate(v) => Ok(v as u32),
            Place::Address(addr) => {
                let size = value
                    .type_id
                    .map(|id| self.index.types.get(self.index.types.resolve(id)).size_or(4))
                    .unwrap_or(4);
                read_unsigned(self.machine, addr, size)
                    .map(|v| v as u32)
                    .ok_or_else(|| {
                        EvalError::new(
                            EvalErrorKind::Memory,
                            format!("pointer at 0x{addr:06X} unreadable"),
                        )
                    })
            }
            Place::None => Err(EvalErrorKind::Resolution.into()),
        }
    }

    fn resolve_identifier(&mut self, ident: &str) -> Result<Value, EvalError> {
        if e9k_common::debug_wants_symbol(ident) {
            tracing::debug!(ident, "resolving identifier");
        }
        // Global variable.
        if let Some(var) = self.index.find_variable(ident) {
            let (addr, type_ref, byte_size) = (var.addr, var.type_ref, var.byte_size);
            let type_id = type_ref
                .and_then(|offset| self.index.type_for_die(offset))
                .or_else(|| byte_size.map(|bytes| self.index.types.default_unsigned(bytes)))
                .or_else(|| self.default_u32());
            tracing::trace!(ident, addr = format_args!("0x{addr:06X}"), "resolved variable");
            return Ok(self.place_at(type_id, addr));
        }

        // Linker symbol.
        if let Some(addr) = self.index.symbols.addr_of(ident) {
            let type_id = self.default_u32();
            tracing::trace!(ident, addr = format_args!("0x{addr:06X}"), "resolved symbol");
            return Ok(self.place_at(type_id, addr));
        }

        // Register.
        if let Some(value) = self.machine.reg(ident) {
            let type_id = self.default_u32();
            return Ok(self.place_imm(type_id, value as u64));
        }

        // Frame local. This needs scope + CFI lookup, so it runs last and
        // only while paused.
        if !self.machine.is_running() {
            if let Some(pc) = self.machine.reg("PC").map(mask24) {
                let machine = self.machine;
                let reg = move |r: u8| machine.reg_dwarf(r);
                if let Some(local) = resolve_local(self.index, ident, pc, &reg) {
                    let type_id = local
                        .type_ref
                        .and_then(|offset| self.index.type_for_die(offset))
                        .or_else(|| self.default_u32());
                    return Ok(match local.place {
                        LocalPlace::Address(addr) => self.place_at(type_id, addr),
                        LocalPlace::Immediate(value) => self.place_imm(type_id, value),
                    });
                }
            }
        }

        Err(EvalError::new(
            EvalErrorKind::Resolution,
            format!("unknown identifier '{ident}'"),
        ))
    }

    fn place_at(&self, type_id: Option<TypeId>, addr: u32) -> Value {
        if self.type_only {
            Value::type_only(type_id)
        } else {
            Value::at_address(type_id, addr)
        }
    }

    fn place_imm(&self, type_id: Option<TypeId>, value: u64) -> Value {
        if self.type_only {
            Value::type_only(type_id)
        } else {
            Value::immediate(type_id, value)
        }
    }

    fn parse_primary(&mut self) -> Result<Value, EvalError> {
        self.skip_ws();
        if self.eat("(") {
            let value = self.parse_expr()?;
            self.expect(")")?;
            return Ok(value);
        }
        if let Some(ident) = self.parse_ident() {
            let ident = ident.to_owned();
            return self.resolve_identifier(&ident);
        }
        if let Some(number) = self.parse_number() {
            let type_id = self.default_u32();
            return Ok(self.place_imm(type_id, number));
        }
        Err(EvalError::new(
            EvalErrorKind::Parse,
            format!("expected expression at '{}'", self.rest()),
        ))
    }

    fn parse_unary(&mut self) -> Result<Value, EvalError> {
        self.skip_ws();
        if self.eat("&") {
            let inner = self.parse_unary()?;
            let ptr_type = Some(self.index.types.synthetic_pointer(inner.type_id));
            if self.type_only {
                return Ok(Value::type_only(ptr_type));
            }
            let addr = inner.address().ok_or_else(|| {
                EvalError::new(EvalErrorKind::Resolution, "cannot take address of value")
            })?;
            return Ok(Value::immediate(ptr_type, addr as u64));
        }
        if self.eat("*") {
            let inner = self.parse_unary()?;
            let resolved = inner.type_id.map(|id| self.index.types.resolve(id));
            let is_pointer = resolved
                .map(|id| self.index.types.get(id).kind == TypeKind::Pointer)
                .unwrap_or(false);
            if is_pointer {
                let target = self.index.types.get(resolved.unwrap()).target;
                if self.type_only {
                    return Ok(Value::type_only(target));
                }
                let addr = self.read_pointer(&inner)?;
                return Ok(Value::at_address(target, addr));
            }
            // Dereferencing an integer reinterprets it as an untyped
            // address.
            let type_id = self.default_u32();
            if self.type_only {
                return Ok(Value::type_only(type_id));
            }
            let addr = match inner.place {
                Place::Immediate(v) => v as u32,
                Place::Address(addr) => addr,
                Place::None => return Err(EvalErrorKind::Resolution.into()),
            };
            return Ok(Value::at_address(type_id, addr));
        }
        self.parse_primary()
    }

    fn parse_postfix(&mut self) -> Result<Value, EvalError> {
        let mut value = self.parse_unary()?;
        loop {
            self.skip_ws();
            if self.eat("->") {
                value = self.member_access(value, true)?;
                continue;
            }
            if self.rest().starts_with('.') {
                self.pos += 1;
                value = self.member_access(value, false)?;
                continue;
            }
            if self.eat("[") {
                let index_value = self.parse_number().ok_or_else(|| {
                    EvalError::new(EvalErrorKind::Parse, "expected array index")
                })?;
                self.expect("]")?;
                value = self.index_access(value, index_value)?;
                continue;
            }
            break;
        }
        Ok(value)
    }

    fn member_access(&mut self, value: Value, arrow: bool) -> Result<Value, EvalError> {
        let member_name = self
            .parse_ident()
            .ok_or_else(|| EvalError::new(EvalErrorKind::Parse, "expected member name"))?
            .to_owned();

        let mut resolved = value
            .type_id
            .map(|id| self.index.types.resolve(id))
            .ok_or(EvalErrorKind::Resolution)?;

        let base_addr;
        if arrow {
            if self.index.types.get(resolved).kind != TypeKind::Pointer {
                return Err(EvalError::new(
                    EvalErrorKind::Resolution,
                    format!("'->' on non-pointer before '{member_name}'"),
                ));
            }
            base_addr = if self.type_only {
                0
            } else {
                let ptr = Value {
                    type_id: Some(resolved),
                    place: value.place,
                };
                self.read_pointer(&ptr)?
            };
            resolved = self
                .index
                .types
                .get(resolved)
                .target
                .map(|id| self.index.types.resolve(id))
                .ok_or(EvalErrorKind::Resolution)?;
        } else {
            base_addr = match value.place {
                Place::Address(addr) => addr,
                Place::None if self.type_only => 0,
                _ => {
                    return Err(EvalError::new(
                        EvalErrorKind::Resolution,
                        format!("'.' on value without address before '{member_name}'"),
                    ))
                }
            };
        }

        let info = self.index.types.get(resolved);
        if info.kind != TypeKind::Struct {
            return Err(EvalError::new(
                EvalErrorKind::Resolution,
                format!("member access on non-struct before '{member_name}'"),
            ));
        }
        let member = info
            .members
            .iter()
            .find(|m| m.name == member_name)
            .ok_or_else(|| {
                EvalError::new(EvalErrorKind::Resolution, format!("no member '{member_name}'"))
            })?;
        let (member_type, member_offset) = (member.type_id, member.offset);
        if self.type_only {
            return Ok(Value::type_only(member_type));
        }
        Ok(Value::at_address(member_type, base_addr + member_offset))
    }

    fn index_access(&mut self, value: Value, element: u64) -> Result<Value, EvalError> {
        let resolved = value
            .type_id
            .map(|id| self.index.types.resolve(id))
            .ok_or(EvalErrorKind::Resolution)?;
        let info = self.index.types.get(resolved);
        let (elem_type, base_addr) = match info.kind {
            TypeKind::Array => {
                let elem_type = info.target;
                let base = match value.place {
                    Place::Address(addr) => addr,
                    Place::None if self.type_only => 0,
                    _ => return Err(EvalErrorKind::Resolution.into()),
                };
                (elem_type, base)
            }
            TypeKind::Pointer => {
                let elem_type = info.target;
                let base = if self.type_only {
                    0
                } else {
                    self.read_pointer(&value)?
                };
                (elem_type, base)
            }
            _ => {
                return Err(EvalError::new(
                    EvalErrorKind::Resolution,
                    "indexing a non-array value",
                ))
            }
        };
        if self.type_only {
            return Ok(Value::type_only(elem_type));
        }
        let elem_size = elem_type
            .map(|id| self.index.types.resolved(id).size_or(1))
            .unwrap_or(1);
        Ok(Value::at_address(
            elem_type,
            base_addr + (element as u32) * elem_size as u32,
        ))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::collections::HashMap;
    use std::path::Path;

    use e9k_debuginfo::dwarf::parse_info;
    use e9k_debuginfo::{DebugIndex, SectionBases, Variable};

    use crate::machine::Machine;

    pub const DUMP: &str = "\
  Compilation Unit @ offset 0x0:
 <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)
 <1><20>: Abbrev Number: 2 (DW_TAG_base_type)
    <21>   DW_AT_byte_size   : 4
    <22>   DW_AT_encoding    : 5\t(signed)
    <23>   DW_AT_name        : int
 <1><28>: Abbrev Number: 2 (DW_TAG_base_type)
    <29>   DW_AT_byte_size   : 2
    <2a>   DW_AT_encoding    : 7\t(unsigned)
    <2b>   DW_AT_name        : unsigned short
 <1><30>: Abbrev Number: 3 (DW_TAG_pointer_type)
    <31>   DW_AT_byte_size   : 4
    <32>   DW_AT_type        : <0x20>
 <1><40>: Abbrev Number: 4 (DW_TAG_structure_type)
    <41>   DW_AT_name        : inner
    <42>   DW_AT_byte_size   : 4
 <2><43>: Abbrev Number: 5 (DW_TAG_member)
    <44>   DW_AT_name        : n
    <45>   DW_AT_type        : <0x20>
    <46>   DW_AT_data_member_location: 0
 <1><50>: Abbrev Number: 6 (DW_TAG_array_type)
    <51>   DW_AT_type        : <0x40>
 <2><52>: Abbrev Number: 7 (DW_TAG_subrange_type)
    <53>   DW_AT_upper_bound : 3
 <1><60>: Abbrev Number: 4 (DW_TAG_structure_type)
    <61>   DW_AT_name        : outer
    <62>   DW_AT_byte_size   : 20
 <2><63>: Abbrev Number: 5 (DW_TAG_member)
    <64>   DW_AT_name        : hp
    <65>   DW_AT_type        : <0x28>
    <66>   DW_AT_data_member_location: 0
 <2><68>: Abbrev Number: 5 (DW_TAG_member)
    <69>   DW_AT_name        : m
    <6a>   DW_AT_type        : <0x50>
    <6b>   DW_AT_data_member_location: 4
 <1><70>: Abbrev Number: 3 (DW_TAG_pointer_type)
    <71>   DW_AT_byte_size   : 4
    <72>   DW_AT_type        : <0x60>
";

    pub struct FakeMachine {
        pub memory: HashMap<u32, u8>,
        pub regs: HashMap<String, u32>,
        pub running: bool,
    }

    impl FakeMachine {
        pub fn new() -> Self {
            Self {
                memory: HashMap::new(),
                regs: HashMap::new(),
                running: false,
            }
        }

        pub fn poke_be(&mut self, addr: u32, value: u64, size: usize) {
            for i in 0..size {
                let shift = (size - 1 - i) * 8;
                self.memory
                    .insert(addr + i as u32, ((value >> shift) & 0xff) as u8);
            }
        }
    }

    impl Machine for FakeMachine {
        fn reg(&self, name: &str) -> Option<u32> {
            self.regs.get(&name.to_ascii_uppercase()).copied()
        }

        fn reg_dwarf(&self, reg: u8) -> Option<u32> {
            let name = if reg <= 7 {
                format!("D{reg}")
            } else if reg <= 15 {
                format!("A{}", reg - 8)
            } else {
                return None;
            };
            self.reg(&name)
        }

        fn read_memory(&self, addr: u32, out: &mut [u8]) -> bool {
            for (i, slot) in out.iter_mut().enumerate() {
                match self.memory.get(&(addr + i as u32)) {
                    Some(&b) => *slot = b,
                    None => return false,
                }
            }
            true
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    /// Globals: `int x` at 0x100200, `int* p = &x` at 0x100204,
    /// `outer s` at 0x100210, `outer* sp = &s` at 0x100230.
    pub fn fixture() -> (DebugIndex, FakeMachine) {
        let mut index = DebugIndex {
            elf_path: Path::new("game.elf").to_owned(),
            bases: SectionBases::default(),
            dies: parse_info(DUMP),
            ..DebugIndex::default()
        };
        index.symbols.push("x", 0x0010_0200);
        index.symbols.push("p", 0x0010_0204);
        index.symbols.push("s", 0x0010_0210);
        index.symbols.push("sp", 0x0010_0230);
        index.symbols.push("raw_buffer", 0x0010_0300);
        for (name, addr, type_ref) in [
            ("x", 0x0010_0200u32, 0x20u32),
            ("p", 0x0010_0204, 0x30),
            ("s", 0x0010_0210, 0x60),
            ("sp", 0x0010_0230, 0x70),
        ] {
            index.variables.push(Variable {
                name: name.to_owned(),
                addr,
                type_ref: Some(type_ref),
                byte_size: None,
            });
        }

        let mut machine = FakeMachine::new();
        machine.poke_be(0x0010_0200, 42, 4); // x = 42
        machine.poke_be(0x0010_0204, 0x0010_0200, 4); // p = &x
        machine.poke_be(0x0010_0210, 99, 2); // s.hp = 99
        for i in 0..4u64 {
            // s.m[i].n = 10 + i
            machine.poke_be(0x0010_0214 + (i as u32) * 4, 10 + i, 4);
        }
        machine.poke_be(0x0010_0230, 0x0010_0210, 4); // sp = &s
        (index, machine)
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::fixture;
    use super::*;

    #[test]
    fn test_global_variable() {
        let (mut index, machine) = fixture();
        let value = evaluate("x", &mut index, &machine, false).unwrap();
        assert_eq!(value.place, Place::Address(0x0010_0200));
        let info = index.types.resolved(value.type_id.unwrap());
        assert_eq!(info.name, "int");
    }

    #[test]
    fn test_address_of() {
        let (mut index, machine) = fixture();
        let value = evaluate("&x", &mut index, &machine, false).unwrap();
        assert_eq!(value.place, Place::Immediate(0x0010_0200));
        let info = index.types.get(value.type_id.unwrap());
        assert_eq!(info.kind, TypeKind::Pointer);
    }

    #[test]
    fn test_deref_pointer() {
        let (mut index, machine) = fixture();
        let value = evaluate("*p", &mut index, &machine, false).unwrap();
        assert_eq!(value.place, Place::Address(0x0010_0200));
        assert_eq!(index.types.resolved(value.type_id.unwrap()).name, "int");
    }

    #[test]
    fn test_deref_number_reinterprets() {
        let (mut index, machine) = fixture();
        let value = evaluate("*0x100200", &mut index, &machine, false).unwrap();
        assert_eq!(value.place, Place::Address(0x0010_0200));
    }

    #[test]
    fn test_member_chain() {
        let (mut index, machine) = fixture();
        let value = evaluate("s.hp", &mut index, &machine, false).unwrap();
        assert_eq!(value.place, Place::Address(0x0010_0210));

        let value = evaluate("sp->m[3].n", &mut index, &machine, false).unwrap();
        // s + 4 (m) + 3*4 (elements) + 0 (n)
        assert_eq!(value.place, Place::Address(0x0010_0220));
        assert_eq!(read_unsigned(&machine, 0x0010_0220, 4), Some(13));
    }

    #[test]
    fn test_address_of_member_chain() {
        let (mut index, machine) = fixture();
        let value = evaluate("&sp->m[3].n", &mut index, &machine, false).unwrap();
        assert_eq!(value.place, Place::Immediate(0x0010_0220));
    }

    #[test]
    fn test_broken_expressions_fail() {
        let (mut index, machine) = fixture();
        for expr in [
            "&sp->m[3].",
            "&sp->m[].n",
            "&sp->m[3]n",
            "&sp-m[3].n",
            "&sp->m[3.n",
            "(x",
            "x)",
            "&42",
            "s.nope",
            "x.hp",
            "p->n",
        ] {
            assert!(
                evaluate(expr, &mut index, &machine, false).is_err(),
                "expected failure for {expr:?}"
            );
        }
    }

    #[test]
    fn test_register_identifier() {
        let (mut index, mut machine) = fixture();
        machine.regs.insert("D0".to_owned(), 7);
        let value = evaluate("d0", &mut index, &machine, false).unwrap();
        assert_eq!(value.place, Place::Immediate(7));
    }

    #[test]
    fn test_type_only_reads_nothing() {
        let (mut index, machine) = fixture();
        let value = evaluate("sp->m[9999].n", &mut index, &machine, true).unwrap();
        assert_eq!(value.place, Place::None);
        assert_eq!(index.types.resolved(value.type_id.unwrap()).name, "int");
    }

    #[test]
    fn test_resolve_address() {
        let (mut index, machine) = fixture();
        assert_eq!(
            resolve_address("s.hp", &mut index, &machine).unwrap(),
            (0x0010_0210, 2)
        );
        assert!(resolve_address("&x", &mut index, &machine).is_err());
    }

    #[test]
    fn test_parenthesized() {
        let (mut index, machine) = fixture();
        let value = evaluate("(*sp).hp", &mut index, &machine, false).unwrap();
        assert_eq!(value.place, Place::Address(0x0010_0210));
    }
}
