// Copyright (c) 2024 The Morphene Developers

//! Declarative schema macros.
//!
//! A struct's field list is written once; the binary encoding, the decoder
//! and the JSON form all follow the declaration order.

/// Define a struct whose wire form is its fields in declaration order.
macro_rules! wire_struct {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$field_meta:meta])* $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub struct $name {
            $( $(#[$field_meta])* pub $field: $ty, )*
        }

        impl $crate::wire::WireEncode for $name {
            fn wire_encode(&self, out: &mut Vec<u8>) {
                $( $crate::wire::WireEncode::wire_encode(&self.$field, out); )*
            }
        }

        impl $crate::wire::WireDecode for $name {
            fn wire_decode(
                reader: &mut $crate::wire::WireReader<'_>,
            ) -> Result<Self, $crate::WireError> {
                Ok(Self {
                    $( $field: $crate::wire::WireDecode::wire_decode(reader)?, )*
                })
            }
        }

        impl $crate::json::ChainJson for $name {
            fn to_chain_json(&self, prefix: &str) -> serde_json::Value {
                let mut object = serde_json::Map::new();
                $(
                    object.insert(
                        stringify!($field).to_string(),
                        $crate::json::ChainJson::to_chain_json(&self.$field, prefix),
                    );
                )*
                serde_json::Value::Object(object)
            }

            fn from_chain_json(
                value: &serde_json::Value,
                prefix: &str,
            ) -> Result<Self, $crate::WireError> {
                let object = $crate::json::expect_object(value, stringify!($name))?;
                Ok(Self {
                    $( $field: $crate::json::read_field(object, stringify!($field), prefix)?, )*
                })
            }
        }
    };
}

/// Define the operation catalog.
///
/// Each entry gives the numeric tag, the chain name and the field schema.
/// The macro emits one struct per operation plus the `Operation` sum type
/// with tag lookup, wire encoding (`varint tag || fields`) and the
/// `[name, {fields}]` JSON form.
macro_rules! define_operations {
    (
        $(
            $(#[$meta:meta])*
            $tag:literal => $chain_name:literal : $variant:ident {
                $( $(#[$field_meta:meta])* $field:ident : $ty:ty ),* $(,)?
            }
        )*
    ) => {
        $(
            wire_struct! {
                $(#[$meta])*
                $variant { $( $(#[$field_meta])* $field: $ty ),* }
            }

            impl $variant {
                /// Position in the operation catalog.
                pub const TAG: u32 = $tag;
                /// Name used in JSON.
                pub const NAME: &'static str = $chain_name;
            }

            impl From<$variant> for Operation {
                fn from(op: $variant) -> Self {
                    Operation::$variant(op)
                }
            }
        )*

        /// One action inside a transaction.
        #[derive(Clone, Debug, PartialEq, Eq)]
        pub enum Operation {
            $( $(#[$meta])* $variant($variant), )*
        }

        impl Operation {
            /// Every registered `(tag, name)` pair in catalog order.
            pub const CATALOG: &'static [(u32, &'static str)] = &[ $( ($tag, $chain_name), )* ];

            /// The operation's catalog tag.
            pub fn tag(&self) -> u32 {
                match self {
                    $( Operation::$variant(_) => $tag, )*
                }
            }

            /// The operation's chain name, e.g. `transfer`.
            pub fn name(&self) -> &'static str {
                match self {
                    $( Operation::$variant(_) => $chain_name, )*
                }
            }

            /// Look up a tag by chain name.
            pub fn tag_for_name(name: &str) -> Option<u32> {
                Self::CATALOG
                    .iter()
                    .find(|(_, known)| *known == name)
                    .map(|(tag, _)| *tag)
            }

            fn body_to_json(&self, prefix: &str) -> serde_json::Value {
                match self {
                    $( Operation::$variant(op) => $crate::json::ChainJson::to_chain_json(op, prefix), )*
                }
            }

            fn body_from_json(
                name: &str,
                body: &serde_json::Value,
                prefix: &str,
            ) -> Result<Self, $crate::WireError> {
                match name {
                    $(
                        $chain_name => Ok(Operation::$variant(
                            $crate::json::ChainJson::from_chain_json(body, prefix)?,
                        )),
                    )*
                    other => Err($crate::WireError::UnknownOperationName(other.to_string())),
                }
            }
        }

        impl $crate::wire::WireEncode for Operation {
            fn wire_encode(&self, out: &mut Vec<u8>) {
                $crate::wire::write_varint(out, u64::from(self.tag()));
                match self {
                    $( Operation::$variant(op) => $crate::wire::WireEncode::wire_encode(op, out), )*
                }
            }
        }

        impl $crate::wire::WireDecode for Operation {
            fn wire_decode(
                reader: &mut $crate::wire::WireReader<'_>,
            ) -> Result<Self, $crate::WireError> {
                match reader.read_varint(32)? {
                    $(
                        $tag => Ok(Operation::$variant(
                            $crate::wire::WireDecode::wire_decode(reader)?,
                        )),
                    )*
                    unknown => Err($crate::WireError::UnknownOperation(unknown)),
                }
            }
        }
    };
}
