//! Matter TLV (Appendix A) reader and encoder.
//!
//! The reader never copies: strings and byte strings are returned as slices
//! of the input buffer. A fresh reader is not positioned on any element until
//! [`TlvReader::next`] is called, mirroring how TLV consumers first advance
//! to the outermost element.

use bytes::{Buf, BufMut, BytesMut};
use num_traits::FromPrimitive;

use crate::error::TlvError;

const ELEMENT_TYPE_MASK: u8 = 0x1F;
const TAG_CONTROL_SHIFT: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSize {
    Byte1,
    Byte2,
    Byte4,
    Byte8,
}

impl ElementSize {
    fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => ElementSize::Byte1,
            1 => ElementSize::Byte2,
            2 => ElementSize::Byte4,
            _ => ElementSize::Byte8,
        }
    }

    fn bits(self) -> u8 {
        match self {
            ElementSize::Byte1 => 0,
            ElementSize::Byte2 => 1,
            ElementSize::Byte4 => 2,
            ElementSize::Byte8 => 3,
        }
    }

    pub const fn len(self) -> usize {
        match self {
            ElementSize::Byte1 => 1,
            ElementSize::Byte2 => 2,
            ElementSize::Byte4 => 4,
            ElementSize::Byte8 => 8,
        }
    }

    fn for_unsigned(value: u64) -> Self {
        if value <= u8::MAX as u64 {
            ElementSize::Byte1
        } else if value <= u16::MAX as u64 {
            ElementSize::Byte2
        } else if value <= u32::MAX as u64 {
            ElementSize::Byte4
        } else {
            ElementSize::Byte8
        }
    }
}

/// Element type, the low 5 bits of the control octet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlvType {
    SignedInt(ElementSize),
    UnsignedInt(ElementSize),
    Boolean(bool),
    Float,
    Double,
    /// Size of the length prefix
    Utf8String(ElementSize),
    ByteString(ElementSize),
    Null,
    Structure,
    Array,
    List,
    EndOfContainer,
}

impl TlvType {
    fn from_bits(bits: u8) -> Result<Self, TlvError> {
        let size = ElementSize::from_bits(bits);
        let tlv_type = match bits {
            0x00..=0x03 => TlvType::SignedInt(size),
            0x04..=0x07 => TlvType::UnsignedInt(size),
            0x08 => TlvType::Boolean(false),
            0x09 => TlvType::Boolean(true),
            0x0A => TlvType::Float,
            0x0B => TlvType::Double,
            0x0C..=0x0F => TlvType::Utf8String(size),
            0x10..=0x13 => TlvType::ByteString(size),
            0x14 => TlvType::Null,
            0x15 => TlvType::Structure,
            0x16 => TlvType::Array,
            0x17 => TlvType::List,
            0x18 => TlvType::EndOfContainer,
            other => return Err(TlvError::InvalidElementType(other)),
        };
        Ok(tlv_type)
    }

    fn bits(self) -> u8 {
        match self {
            TlvType::SignedInt(size) => size.bits(),
            TlvType::UnsignedInt(size) => 0x04 | size.bits(),
            TlvType::Boolean(false) => 0x08,
            TlvType::Boolean(true) => 0x09,
            TlvType::Float => 0x0A,
            TlvType::Double => 0x0B,
            TlvType::Utf8String(size) => 0x0C | size.bits(),
            TlvType::ByteString(size) => 0x10 | size.bits(),
            TlvType::Null => 0x14,
            TlvType::Structure => 0x15,
            TlvType::Array => 0x16,
            TlvType::List => 0x17,
            TlvType::EndOfContainer => 0x18,
        }
    }

    pub fn is_container(self) -> bool {
        matches!(self, TlvType::Structure | TlvType::Array | TlvType::List)
    }
}

#[repr(u8)]
#[derive(FromPrimitive)]
enum TagControlCode {
    Anonymous = 0,
    ContextSpecific = 1,
    CommonProfile2 = 2,
    CommonProfile4 = 3,
    ImplicitProfile2 = 4,
    ImplicitProfile4 = 5,
    FullyQualified6 = 6,
    FullyQualified8 = 7,
}

/// Tag form, the high 3 bits of the control octet, together with the tag itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagControl {
    Anonymous,
    ContextSpecific(u8),
    CommonProfile2(u16),
    CommonProfile4(u32),
    ImplicitProfile2(u16),
    ImplicitProfile4(u32),
    FullyQualified6 {
        vendor_id: u16,
        profile_number: u16,
        tag: u16,
    },
    FullyQualified8 {
        vendor_id: u16,
        profile_number: u16,
        tag: u32,
    },
}

impl TagControl {
    /// Returns `None` if the buffer is too short to hold the tag.
    fn read(code: TagControlCode, buf: &mut &[u8]) -> Option<Self> {
        let needed = match code {
            TagControlCode::Anonymous => 0,
            TagControlCode::ContextSpecific => 1,
            TagControlCode::CommonProfile2 | TagControlCode::ImplicitProfile2 => 2,
            TagControlCode::CommonProfile4 | TagControlCode::ImplicitProfile4 => 4,
            TagControlCode::FullyQualified6 => 6,
            TagControlCode::FullyQualified8 => 8,
        };
        if buf.remaining() < needed {
            return None;
        }
        let tag = match code {
            TagControlCode::Anonymous => TagControl::Anonymous,
            TagControlCode::ContextSpecific => TagControl::ContextSpecific(buf.get_u8()),
            TagControlCode::CommonProfile2 => TagControl::CommonProfile2(buf.get_u16_le()),
            TagControlCode::CommonProfile4 => TagControl::CommonProfile4(buf.get_u32_le()),
            TagControlCode::ImplicitProfile2 => TagControl::ImplicitProfile2(buf.get_u16_le()),
            TagControlCode::ImplicitProfile4 => TagControl::ImplicitProfile4(buf.get_u32_le()),
            TagControlCode::FullyQualified6 => TagControl::FullyQualified6 {
                vendor_id: buf.get_u16_le(),
                profile_number: buf.get_u16_le(),
                tag: buf.get_u16_le(),
            },
            TagControlCode::FullyQualified8 => TagControl::FullyQualified8 {
                vendor_id: buf.get_u16_le(),
                profile_number: buf.get_u16_le(),
                tag: buf.get_u32_le(),
            },
        };
        Some(tag)
    }

    fn code(&self) -> TagControlCode {
        match self {
            TagControl::Anonymous => TagControlCode::Anonymous,
            TagControl::ContextSpecific(_) => TagControlCode::ContextSpecific,
            TagControl::CommonProfile2(_) => TagControlCode::CommonProfile2,
            TagControl::CommonProfile4(_) => TagControlCode::CommonProfile4,
            TagControl::ImplicitProfile2(_) => TagControlCode::ImplicitProfile2,
            TagControl::ImplicitProfile4(_) => TagControlCode::ImplicitProfile4,
            TagControl::FullyQualified6 { .. } => TagControlCode::FullyQualified6,
            TagControl::FullyQualified8 { .. } => TagControlCode::FullyQualified8,
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        match *self {
            TagControl::Anonymous => {}
            TagControl::ContextSpecific(tag) => buf.put_u8(tag),
            TagControl::CommonProfile2(tag) | TagControl::ImplicitProfile2(tag) => {
                buf.put_u16_le(tag)
            }
            TagControl::CommonProfile4(tag) | TagControl::ImplicitProfile4(tag) => {
                buf.put_u32_le(tag)
            }
            TagControl::FullyQualified6 {
                vendor_id,
                profile_number,
                tag,
            } => {
                buf.put_u16_le(vendor_id);
                buf.put_u16_le(profile_number);
                buf.put_u16_le(tag);
            }
            TagControl::FullyQualified8 {
                vendor_id,
                profile_number,
                tag,
            } => {
                buf.put_u16_le(vendor_id);
                buf.put_u16_le(profile_number);
                buf.put_u32_le(tag);
            }
        }
    }
}

/// Decoded value of an element. Strings borrow from the reader's buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TagLengthValue<'a> {
    Signed(i64),
    Unsigned(u64),
    Boolean(bool),
    Float(f32),
    Double(f64),
    Utf8String(&'a str),
    ByteString(&'a [u8]),
    Null,
    Structure,
    Array,
    List,
    EndOfContainer,
}

/// One element as it appears in the buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element<'a> {
    pub tag: TagControl,
    pub tlv_type: TlvType,
    pub value: TagLengthValue<'a>,
    /// Offset of the control octet in the reader's buffer
    pub offset: usize,
}

impl<'a> Element<'a> {
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self.value {
            TagLengthValue::ByteString(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_unsigned(&self) -> Option<u64> {
        match self.value {
            TagLengthValue::Unsigned(v) => Some(v),
            _ => None,
        }
    }
}

fn read_uint(buf: &mut &[u8], size: ElementSize) -> Option<u64> {
    if buf.remaining() < size.len() {
        return None;
    }
    let value = match size {
        ElementSize::Byte1 => buf.get_u8() as u64,
        ElementSize::Byte2 => buf.get_u16_le() as u64,
        ElementSize::Byte4 => buf.get_u32_le() as u64,
        ElementSize::Byte8 => buf.get_u64_le(),
    };
    Some(value)
}

fn read_int(buf: &mut &[u8], size: ElementSize) -> Option<i64> {
    if buf.remaining() < size.len() {
        return None;
    }
    let value = match size {
        ElementSize::Byte1 => buf.get_i8() as i64,
        ElementSize::Byte2 => buf.get_i16_le() as i64,
        ElementSize::Byte4 => buf.get_i32_le() as i64,
        ElementSize::Byte8 => buf.get_i64_le(),
    };
    Some(value)
}

fn read_slice<'a>(buf: &mut &'a [u8], size: ElementSize) -> Option<&'a [u8]> {
    let len = usize::try_from(read_uint(buf, size)?).ok()?;
    if buf.len() < len {
        return None;
    }
    let (bytes, rest) = buf.split_at(len);
    *buf = rest;
    Some(bytes)
}

/// Zero-copy, forward-only reader over a TLV buffer.
#[derive(Debug, Clone)]
pub struct TlvReader<'a> {
    buf: &'a [u8],
    /// Offset of the next unread octet
    pos: usize,
    /// Number of containers entered and not yet exited
    depth: usize,
    current: Option<Element<'a>>,
}

impl<'a> TlvReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            depth: 0,
            current: None,
        }
    }

    /// The element the reader is positioned on, or `None` if not positioned.
    pub fn element(&self) -> Option<&Element<'a>> {
        self.current.as_ref()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Advance to the next element at the current nesting level.
    ///
    /// An unentered container is skipped as a whole. Returns `Ok(None)` at the
    /// end of the enclosing container, or at the end of the buffer when at the
    /// top level.
    pub fn next(&mut self) -> Result<Option<Element<'a>>, TlvError> {
        if let Some(current) = self.current.take() {
            if current.tlv_type.is_container() {
                self.skip_container_contents()?;
            }
        }

        if self.pos >= self.buf.len() {
            if self.depth > 0 {
                return Err(TlvError::Truncated { offset: self.pos });
            }
            return Ok(None);
        }

        let element = self.read_element()?;
        if element.tlv_type == TlvType::EndOfContainer {
            if self.depth == 0 {
                return Err(TlvError::UnexpectedEndOfContainer {
                    offset: element.offset,
                });
            }
            // Leave the marker for exit_container
            self.pos = element.offset;
            return Ok(None);
        }

        self.current = Some(element);
        Ok(Some(element))
    }

    /// Advance until an element with `tag` is found at the current level.
    pub fn seek(&mut self, tag: TagControl) -> Result<Option<Element<'a>>, TlvError> {
        while let Some(element) = self.next()? {
            if element.tag == tag {
                return Ok(Some(element));
            }
        }
        Ok(None)
    }

    /// Descend into the container the reader is positioned on.
    pub fn enter_container(&mut self) -> Result<(), TlvError> {
        match self.current {
            Some(element) if element.tlv_type.is_container() => {
                self.depth += 1;
                self.current = None;
                Ok(())
            }
            _ => Err(TlvError::NotAContainer),
        }
    }

    /// Skip the rest of the current container and return to its parent level.
    pub fn exit_container(&mut self) -> Result<(), TlvError> {
        if self.depth == 0 {
            return Err(TlvError::NotAContainer);
        }
        if let Some(current) = self.current.take() {
            if current.tlv_type.is_container() {
                self.skip_container_contents()?;
            }
        }
        self.skip_container_contents()?;
        self.depth -= 1;
        Ok(())
    }

    /// Consume elements up to and including the end-of-container marker that
    /// closes the container whose header was just read.
    fn skip_container_contents(&mut self) -> Result<(), TlvError> {
        let mut level = 1usize;
        while level > 0 {
            if self.pos >= self.buf.len() {
                return Err(TlvError::Truncated { offset: self.pos });
            }
            let element = self.read_element()?;
            if element.tlv_type.is_container() {
                level += 1;
            } else if element.tlv_type == TlvType::EndOfContainer {
                level -= 1;
            }
        }
        Ok(())
    }

    fn read_element(&mut self) -> Result<Element<'a>, TlvError> {
        let offset = self.pos;
        let truncated = TlvError::Truncated { offset };
        let mut buf: &'a [u8] = &self.buf[self.pos..];
        if !buf.has_remaining() {
            return Err(truncated);
        }

        let control = buf.get_u8();
        let tlv_type = TlvType::from_bits(control & ELEMENT_TYPE_MASK)?;
        let code = TagControlCode::from_u8(control >> TAG_CONTROL_SHIFT)
            .ok_or(TlvError::InvalidElementType(control))?;
        let tag = TagControl::read(code, &mut buf).ok_or(truncated.clone())?;

        let value = match tlv_type {
            TlvType::SignedInt(size) => {
                TagLengthValue::Signed(read_int(&mut buf, size).ok_or(truncated.clone())?)
            }
            TlvType::UnsignedInt(size) => {
                TagLengthValue::Unsigned(read_uint(&mut buf, size).ok_or(truncated.clone())?)
            }
            TlvType::Boolean(value) => TagLengthValue::Boolean(value),
            TlvType::Float => {
                let bits = read_uint(&mut buf, ElementSize::Byte4).ok_or(truncated.clone())?;
                TagLengthValue::Float(f32::from_bits(bits as u32))
            }
            TlvType::Double => {
                let bits = read_uint(&mut buf, ElementSize::Byte8).ok_or(truncated.clone())?;
                TagLengthValue::Double(f64::from_bits(bits))
            }
            TlvType::Utf8String(size) => {
                let bytes = read_slice(&mut buf, size).ok_or(truncated.clone())?;
                let s = core::str::from_utf8(bytes).map_err(|_| TlvError::InvalidUtf8)?;
                TagLengthValue::Utf8String(s)
            }
            TlvType::ByteString(size) => {
                TagLengthValue::ByteString(read_slice(&mut buf, size).ok_or(truncated.clone())?)
            }
            TlvType::Null => TagLengthValue::Null,
            TlvType::Structure => TagLengthValue::Structure,
            TlvType::Array => TagLengthValue::Array,
            TlvType::List => TagLengthValue::List,
            TlvType::EndOfContainer => TagLengthValue::EndOfContainer,
        };

        self.pos = self.buf.len() - buf.len();
        Ok(Element {
            tag,
            tlv_type,
            value,
            offset,
        })
    }
}

/// Appends the TLV elements a CSR envelope is made of to an owned buffer.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_header(&mut self, tag: TagControl, tlv_type: TlvType) {
        let control = ((tag.code() as u8) << TAG_CONTROL_SHIFT) | tlv_type.bits();
        self.buf.put_u8(control);
        tag.write(&mut self.buf);
    }

    fn put_uint(&mut self, size: ElementSize, value: u64) {
        match size {
            ElementSize::Byte1 => self.buf.put_u8(value as u8),
            ElementSize::Byte2 => self.buf.put_u16_le(value as u16),
            ElementSize::Byte4 => self.buf.put_u32_le(value as u32),
            ElementSize::Byte8 => self.buf.put_u64_le(value),
        }
    }

    pub fn start_structure(&mut self, tag: TagControl) {
        self.put_header(tag, TlvType::Structure);
    }

    pub fn end_container(&mut self) {
        self.put_header(TagControl::Anonymous, TlvType::EndOfContainer);
    }

    pub fn put_bytes(&mut self, tag: TagControl, bytes: &[u8]) {
        let size = ElementSize::for_unsigned(bytes.len() as u64);
        self.put_header(tag, TlvType::ByteString(size));
        self.put_uint(size, bytes.len() as u64);
        self.buf.put_slice(bytes);
    }

    /// Narrowest encoding for `value`
    pub fn put_unsigned(&mut self, tag: TagControl, value: u64) {
        let size = ElementSize::for_unsigned(value);
        self.put_header(tag, TlvType::UnsignedInt(size));
        self.put_uint(size, value);
    }

    pub fn to_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn inner(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // PBKDFParamRequest captured from a commissioning exchange
    const PBKDF_PARAM_REQUEST: [u8; 117] = hex_literal::hex!("15300120c3bf6a81dda5b85c626a582fdaf855cb7085ee308c8976954544afe814cca1a3300220cbcf9f1deebd2e12bac9ae12ef8573f6dfa8a80ef27a0de5529661652ddf315b24030135042501d00730022054dbdb1db37e40d5d57c9e1a84ffde9311a98a843cec2e75b526fa4f424def761818");

    #[test]
    fn reader_starts_unpositioned() {
        let reader = TlvReader::new(&PBKDF_PARAM_REQUEST);
        assert!(reader.element().is_none());
    }

    #[test]
    fn decode_structure_and_skip_nested_container() {
        let mut reader = TlvReader::new(&PBKDF_PARAM_REQUEST);
        let outer = reader.next().unwrap().unwrap();
        assert_eq!(outer.tag, TagControl::Anonymous);
        assert_eq!(outer.tlv_type, TlvType::Structure);
        reader.enter_container().unwrap();

        let random = reader.next().unwrap().unwrap();
        assert_eq!(random.tag, TagControl::ContextSpecific(1));
        let bytes = random.as_bytes().unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[..2], &[0xc3, 0xbf]);
        // Borrowed from the input, not copied
        assert_eq!(bytes.as_ptr(), PBKDF_PARAM_REQUEST[4..].as_ptr());

        let session = reader.next().unwrap().unwrap();
        assert_eq!(session.tag, TagControl::ContextSpecific(2));

        let passcode_id = reader.next().unwrap().unwrap();
        assert_eq!(passcode_id.tag, TagControl::ContextSpecific(3));
        assert_eq!(passcode_id.tlv_type, TlvType::UnsignedInt(ElementSize::Byte1));
        assert_eq!(passcode_id.as_unsigned(), Some(1));

        let params = reader.next().unwrap().unwrap();
        assert_eq!(params.tag, TagControl::ContextSpecific(4));
        assert_eq!(params.tlv_type, TlvType::Structure);

        // Not entered, so the whole nested structure is skipped
        assert!(reader.next().unwrap().is_none());
        reader.exit_container().unwrap();
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn enter_nested_container() {
        let mut reader = TlvReader::new(&PBKDF_PARAM_REQUEST);
        reader.next().unwrap();
        reader.enter_container().unwrap();
        let params = reader.seek(TagControl::ContextSpecific(4)).unwrap().unwrap();
        assert_eq!(params.tlv_type, TlvType::Structure);
        reader.enter_container().unwrap();
        let iterations = reader.next().unwrap().unwrap();
        assert_eq!(iterations.as_unsigned(), Some(2000));
        reader.exit_container().unwrap();
        assert_eq!(reader.depth(), 1);
        reader.exit_container().unwrap();
        assert_eq!(reader.depth(), 0);
    }

    #[test]
    fn truncated_container_is_reported() {
        let data = &PBKDF_PARAM_REQUEST[..PBKDF_PARAM_REQUEST.len() - 1];
        let mut reader = TlvReader::new(data);
        reader.next().unwrap();
        reader.enter_container().unwrap();
        assert!(reader.seek(TagControl::ContextSpecific(9)).is_err());
    }

    #[test]
    fn truncated_byte_string_is_reported() {
        let data = &PBKDF_PARAM_REQUEST[..20];
        let mut reader = TlvReader::new(data);
        reader.next().unwrap();
        reader.enter_container().unwrap();
        assert_eq!(reader.next(), Err(TlvError::Truncated { offset: 1 }));
    }

    #[test]
    fn stray_end_of_container() {
        let mut reader = TlvReader::new(&[0x18]);
        assert_eq!(
            reader.next(),
            Err(TlvError::UnexpectedEndOfContainer { offset: 0 })
        );
    }

    #[test]
    fn invalid_element_type() {
        let mut reader = TlvReader::new(&[0x1F]);
        assert_eq!(reader.next(), Err(TlvError::InvalidElementType(0x1F)));
    }

    #[test]
    fn encoder_matches_captured_bytes() {
        let data = &PBKDF_PARAM_REQUEST;
        let mut encoder = Encoder::new();
        encoder.start_structure(TagControl::Anonymous);
        encoder.put_bytes(TagControl::ContextSpecific(1), &data[4..36]);
        encoder.put_bytes(TagControl::ContextSpecific(2), &data[39..71]);
        encoder.put_unsigned(TagControl::ContextSpecific(3), 1);
        encoder.start_structure(TagControl::ContextSpecific(4));
        encoder.put_unsigned(TagControl::ContextSpecific(1), 2000);
        encoder.put_bytes(TagControl::ContextSpecific(2), &data[83..115]);
        encoder.end_container();
        encoder.end_container();
        assert_eq!(hex::encode(encoder.to_slice()), hex::encode(data));
    }

    #[test]
    fn other_element_types_are_decoded() {
        // { 1: -300, CommonProfile2(7): "fabric", 3: true, 4: null }
        let data = hex_literal::hex!("15 21 01 d4fe 4c 0700 06 666162726963 29 03 34 04 18");
        let mut reader = TlvReader::new(&data);
        reader.next().unwrap();
        reader.enter_container().unwrap();
        let signed = reader.next().unwrap().unwrap();
        assert_eq!(signed.tlv_type, TlvType::SignedInt(ElementSize::Byte2));
        assert_eq!(signed.value, TagLengthValue::Signed(-300));
        let label = reader.next().unwrap().unwrap();
        assert_eq!(label.tag, TagControl::CommonProfile2(7));
        assert_eq!(label.value, TagLengthValue::Utf8String("fabric"));
        let flag = reader.next().unwrap().unwrap();
        assert_eq!(flag.value, TagLengthValue::Boolean(true));
        let null = reader.next().unwrap().unwrap();
        assert_eq!(null.value, TagLengthValue::Null);
        assert!(reader.next().unwrap().is_none());
        reader.exit_container().unwrap();
    }
}
