//! Bytecode Ops (§4.4): the small enumeration the CVM interprets. Each Op
//! carries whatever cells and sub-ops it depends on, with a one-byte tag
//! per the VLC/tag wire scheme in §6 (the same scheme `Cell` itself uses),
//! so a `Transaction`'s program is hashed and signed the same way as any
//! other canonical value.

use lattice_data::codec::{read_blob, read_vlc_u64, write_blob, write_vlc_u64};
use lattice_data::{CanonicalEncode, Cell};
use lattice_types::DataError;

/// One CVM instruction.
#[derive(Clone, Debug)]
pub enum Op {
    /// Pushes a literal cell.
    Constant(Cell),
    /// Evaluates each op in sequence, yielding the last result.
    Do(Vec<Op>),
    /// Resolves a symbol: current account environment, then core.
    Lookup(String),
    /// Installs a binding in the current account environment.
    Def(String, Box<Op>),
    /// Pushes a lexical frame of bindings, evaluates the body, pops the
    /// frame.
    Let(Vec<Op>, Vec<Op>),
    /// Reads lexical slot `n` from the top frame.
    Local(usize),
    /// Writes lexical slot `n` in the top frame.
    Set(usize, Box<Op>),
    /// Calls a callable value with evaluated arguments.
    Invoke(Box<Op>, Vec<Op>),
    /// `if`: test, then-branch, else-branch.
    Cond(Box<Op>, Box<Op>, Box<Op>),
    /// Captures the current lexical stack, parameter names, and body.
    Lambda(Vec<String>, Vec<Op>),
    /// A read-only sub-evaluation; forbids state mutation in its body.
    Query(Box<Op>),
    /// A VM-recognized special form (e.g. a special symbol read, or a
    /// built-in control op) identified by name with evaluated arguments.
    Special(String, Vec<Op>),
}

const TAG_CONSTANT: u8 = 0;
const TAG_DO: u8 = 1;
const TAG_LOOKUP: u8 = 2;
const TAG_DEF: u8 = 3;
const TAG_LET: u8 = 4;
const TAG_LOCAL: u8 = 5;
const TAG_SET: u8 = 6;
const TAG_INVOKE: u8 = 7;
const TAG_COND: u8 = 8;
const TAG_LAMBDA: u8 = 9;
const TAG_QUERY: u8 = 10;
const TAG_SPECIAL: u8 = 11;

fn write_ops(out: &mut Vec<u8>, ops: &[Op]) {
    write_vlc_u64(out, ops.len() as u64);
    for op in ops {
        out.extend_from_slice(&op.encode());
    }
}

fn read_ops(bytes: &[u8]) -> Result<(Vec<Op>, usize), DataError> {
    let (n, mut pos) = read_vlc_u64(bytes)?;
    let mut ops = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let (op, len) = Op::decode_with_len(&bytes[pos..])?;
        ops.push(op);
        pos += len;
    }
    Ok((ops, pos))
}

fn write_strings(out: &mut Vec<u8>, strings: &[String]) {
    write_vlc_u64(out, strings.len() as u64);
    for s in strings {
        write_blob(out, s.as_bytes());
    }
}

fn read_strings(bytes: &[u8]) -> Result<(Vec<String>, usize), DataError> {
    let (n, mut pos) = read_vlc_u64(bytes)?;
    let mut strings = Vec::with_capacity(n as usize);
    for _ in 0..n {
        let (b, len) = read_blob(&bytes[pos..])?;
        strings.push(
            String::from_utf8(b.to_vec()).map_err(|e| DataError::MalformedEncoding(e.to_string()))?,
        );
        pos += len;
    }
    Ok((strings, pos))
}

impl CanonicalEncode for Op {
    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Op::Constant(c) => {
                out.push(TAG_CONSTANT);
                out.extend_from_slice(&c.encode());
            }
            Op::Do(ops) => {
                out.push(TAG_DO);
                write_ops(&mut out, ops);
            }
            Op::Lookup(symbol) => {
                out.push(TAG_LOOKUP);
                write_blob(&mut out, symbol.as_bytes());
            }
            Op::Def(symbol, value) => {
                out.push(TAG_DEF);
                write_blob(&mut out, symbol.as_bytes());
                out.extend_from_slice(&value.encode());
            }
            Op::Let(bindings, body) => {
                out.push(TAG_LET);
                write_ops(&mut out, bindings);
                write_ops(&mut out, body);
            }
            Op::Local(n) => {
                out.push(TAG_LOCAL);
                write_vlc_u64(&mut out, *n as u64);
            }
            Op::Set(n, value) => {
                out.push(TAG_SET);
                write_vlc_u64(&mut out, *n as u64);
                out.extend_from_slice(&value.encode());
            }
            Op::Invoke(callee, args) => {
                out.push(TAG_INVOKE);
                out.extend_from_slice(&callee.encode());
                write_ops(&mut out, args);
            }
            Op::Cond(test, then_op, else_op) => {
                out.push(TAG_COND);
                out.extend_from_slice(&test.encode());
                out.extend_from_slice(&then_op.encode());
                out.extend_from_slice(&else_op.encode());
            }
            Op::Lambda(params, body) => {
                out.push(TAG_LAMBDA);
                write_strings(&mut out, params);
                write_ops(&mut out, body);
            }
            Op::Query(inner) => {
                out.push(TAG_QUERY);
                out.extend_from_slice(&inner.encode());
            }
            Op::Special(name, args) => {
                out.push(TAG_SPECIAL);
                write_blob(&mut out, name.as_bytes());
                write_ops(&mut out, args);
            }
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Self, DataError> {
        let (op, len) = Self::decode_with_len(bytes)?;
        if len != bytes.len() {
            return Err(DataError::MalformedEncoding(
                "trailing bytes after op encoding".into(),
            ));
        }
        Ok(op)
    }
}

impl Op {
    fn decode_with_len(bytes: &[u8]) -> Result<(Self, usize), DataError> {
        let tag = *bytes
            .first()
            .ok_or_else(|| DataError::MalformedEncoding("empty op encoding".into()))?;
        let body = &bytes[1..];
        match tag {
            TAG_CONSTANT => {
                let (c, len) = Cell::decode_with_len(body)?;
                Ok((Op::Constant(c), 1 + len))
            }
            TAG_DO => {
                let (ops, len) = read_ops(body)?;
                Ok((Op::Do(ops), 1 + len))
            }
            TAG_LOOKUP => {
                let (b, len) = read_blob(body)?;
                let symbol = String::from_utf8(b.to_vec())
                    .map_err(|e| DataError::MalformedEncoding(e.to_string()))?;
                Ok((Op::Lookup(symbol), 1 + len))
            }
            TAG_DEF => {
                let (b, blen) = read_blob(body)?;
                let symbol = String::from_utf8(b.to_vec())
                    .map_err(|e| DataError::MalformedEncoding(e.to_string()))?;
                let (value, vlen) = Op::decode_with_len(&body[blen..])?;
                Ok((Op::Def(symbol, Box::new(value)), 1 + blen + vlen))
            }
            TAG_LET => {
                let (bindings, blen) = read_ops(body)?;
                let (body_ops, bodylen) = read_ops(&body[blen..])?;
                Ok((Op::Let(bindings, body_ops), 1 + blen + bodylen))
            }
            TAG_LOCAL => {
                let (n, len) = read_vlc_u64(body)?;
                Ok((Op::Local(n as usize), 1 + len))
            }
            TAG_SET => {
                let (n, nlen) = read_vlc_u64(body)?;
                let (value, vlen) = Op::decode_with_len(&body[nlen..])?;
                Ok((Op::Set(n as usize, Box::new(value)), 1 + nlen + vlen))
            }
            TAG_INVOKE => {
                let (callee, clen) = Op::decode_with_len(body)?;
                let (args, alen) = read_ops(&body[clen..])?;
                Ok((Op::Invoke(Box::new(callee), args), 1 + clen + alen))
            }
            TAG_COND => {
                let (test, tlen) = Op::decode_with_len(body)?;
                let (then_op, thlen) = Op::decode_with_len(&body[tlen..])?;
                let (else_op, elen) = Op::decode_with_len(&body[tlen + thlen..])?;
                Ok((
                    Op::Cond(Box::new(test), Box::new(then_op), Box::new(else_op)),
                    1 + tlen + thlen + elen,
                ))
            }
            TAG_LAMBDA => {
                let (params, plen) = read_strings(body)?;
                let (body_ops, bodylen) = read_ops(&body[plen..])?;
                Ok((Op::Lambda(params, body_ops), 1 + plen + bodylen))
            }
            TAG_QUERY => {
                let (inner, len) = Op::decode_with_len(body)?;
                Ok((Op::Query(Box::new(inner)), 1 + len))
            }
            TAG_SPECIAL => {
                let (b, blen) = read_blob(body)?;
                let name = String::from_utf8(b.to_vec())
                    .map_err(|e| DataError::MalformedEncoding(e.to_string()))?;
                let (args, alen) = read_ops(&body[blen..])?;
                Ok((Op::Special(name, args), 1 + blen + alen))
            }
            other => Err(DataError::UnknownTag(other)),
        }
    }
}

impl PartialEq for Op {
    fn eq(&self, other: &Self) -> bool {
        self.encode() == other.encode()
    }
}
impl Eq for Op {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn op_tree_round_trips() {
        let op = Op::Do(vec![
            Op::Def("x".into(), Box::new(Op::Constant(Cell::Long(1)))),
            Op::Cond(
                Box::new(Op::Lookup("x".into())),
                Box::new(Op::Invoke(
                    Box::new(Op::Constant(Cell::Keyword("transfer".into()))),
                    vec![Op::Local(0)],
                )),
                Box::new(Op::Special("halt".into(), vec![])),
            ),
        ]);
        let bytes = op.encode();
        let decoded = Op::decode(&bytes).unwrap();
        assert_eq!(op, decoded);
    }
}
