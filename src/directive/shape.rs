//! Declared top-level fields of a request type.
//!
//! `serde_json::to_value` leaves out fields skipped for a particular value
//! (`skip_serializing_if`), so a field missing from one serialized request may
//! still exist on the type. This serializer records every field name a struct
//! reports, including skipped ones, without serializing any values.

use std::fmt;

use serde::Serialize;
use serde::ser::{self, Impossible};
use thiserror::Error;

/// Field names declared by `request`'s type, or `None` when it does not
/// serialize as a plain struct (maps, enums, flattened structs).
pub(crate) fn declared_fields<R: Serialize + ?Sized>(request: &R) -> Option<Vec<&'static str>> {
    request.serialize(FieldNames).ok()
}

#[derive(Debug, Error)]
#[error("request does not serialize as a plain struct")]
pub(crate) struct OpenShape;

impl ser::Error for OpenShape {
    fn custom<T: fmt::Display>(_msg: T) -> Self {
        OpenShape
    }
}

struct FieldNames;

struct StructFields {
    names: Vec<&'static str>,
}

impl ser::SerializeStruct for StructFields {
    type Ok = Vec<&'static str>;
    type Error = OpenShape;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        _value: &T,
    ) -> Result<(), OpenShape> {
        self.names.push(key);
        Ok(())
    }

    fn skip_field(&mut self, key: &'static str) -> Result<(), OpenShape> {
        self.names.push(key);
        Ok(())
    }

    fn end(self) -> Result<Self::Ok, OpenShape> {
        Ok(self.names)
    }
}

type Open = Impossible<Vec<&'static str>, OpenShape>;

impl ser::Serializer for FieldNames {
    type Ok = Vec<&'static str>;
    type Error = OpenShape;
    type SerializeSeq = Open;
    type SerializeTuple = Open;
    type SerializeTupleStruct = Open;
    type SerializeTupleVariant = Open;
    type SerializeMap = Open;
    type SerializeStruct = StructFields;
    type SerializeStructVariant = Open;

    fn serialize_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<StructFields, OpenShape> {
        Ok(StructFields {
            names: Vec::with_capacity(len),
        })
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Self::Ok, OpenShape> {
        Ok(Vec::new())
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Self::Ok, OpenShape> {
        value.serialize(self)
    }

    fn serialize_bool(self, _v: bool) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_i8(self, _v: i8) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_i16(self, _v: i16) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_i32(self, _v: i32) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_i64(self, _v: i64) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_u8(self, _v: u8) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_u16(self, _v: u16) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_u32(self, _v: u32) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_u64(self, _v: u64) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_f32(self, _v: f32) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_f64(self, _v: f64) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_char(self, _v: char) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_str(self, _v: &str) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_bytes(self, _v: &[u8]) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_none(self) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, _value: &T) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_unit(self) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
    ) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _value: &T,
    ) -> Result<Self::Ok, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_seq(self, _len: Option<usize>) -> Result<Open, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Open, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Open, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Open, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Open, OpenShape> {
        Err(OpenShape)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Open, OpenShape> {
        Err(OpenShape)
    }
}
