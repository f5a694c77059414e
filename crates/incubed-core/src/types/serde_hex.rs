//! Serde adapters for `0x`-prefixed hex fields and JSON-RPC quantities.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

/// Quantities arrive either as JSON numbers or as hex strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawQuantity {
    Number(u64),
    Hex(String),
}

fn quantity_from_raw<E: serde::de::Error>(raw: RawQuantity) -> Result<u64, E> {
    match raw {
        RawQuantity::Number(n) => Ok(n),
        RawQuantity::Hex(s) if s.starts_with("0x") => {
            crate::bytes::parse_quantity(&s).map_err(E::custom)
        }
        RawQuantity::Hex(s) => s.parse().map_err(E::custom),
    }
}

pub mod quantity {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::bytes::to_quantity(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        quantity_from_raw(RawQuantity::deserialize(deserializer)?)
    }
}

pub mod opt_quantity {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&crate::bytes::to_quantity(*v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
        Option::<RawQuantity>::deserialize(deserializer)?
            .map(quantity_from_raw)
            .transpose()
    }
}

pub mod fixed {
    use super::*;

    pub fn serialize<S: Serializer, const N: usize>(
        value: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::bytes::to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::bytes::parse_fixed::<N>(&s).map_err(D::Error::custom)
    }
}

pub mod opt_fixed {
    use super::*;

    pub fn serialize<S: Serializer, const N: usize>(
        value: &Option<[u8; N]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&crate::bytes::to_hex(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<Option<[u8; N]>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| crate::bytes::parse_fixed::<N>(&s).map_err(D::Error::custom))
            .transpose()
    }
}

pub mod addresses {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(value: &[[u8; 20]], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for address in value {
            seq.serialize_element(&crate::bytes::to_hex(address))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<[u8; 20]>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| crate::bytes::hex_to_address(s).map_err(D::Error::custom))
            .collect()
    }
}

pub mod bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&crate::bytes::to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        crate::bytes::parse_hex(&s).map_err(D::Error::custom)
    }
}

pub mod bytes_list {
    use super::*;
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(value: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(value.len()))?;
        for item in value {
            seq.serialize_element(&crate::bytes::to_hex(item))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| crate::bytes::parse_hex(s).map_err(D::Error::custom))
            .collect()
    }
}

pub mod opt_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&crate::bytes::to_hex(v)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| crate::bytes::parse_hex(&s).map_err(D::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        #[serde(with = "super::quantity")]
        number: u64,
        #[serde(with = "super::fixed")]
        hash: [u8; 4],
        #[serde(with = "super::addresses", default)]
        signers: Vec<[u8; 20]>,
        #[serde(with = "super::opt_quantity", default)]
        index: Option<u64>,
    }

    #[test]
    fn test_quantity_accepts_numbers_and_hex() {
        let a: Sample = serde_json::from_str(r#"{"number":"0x1f","hash":"0x01020304"}"#).unwrap();
        let b: Sample = serde_json::from_str(r#"{"number":31,"hash":"01020304","index":2}"#).unwrap();
        assert_eq!(a.number, 31);
        assert_eq!(b.number, 31);
        assert_eq!(a.index, None);
        assert_eq!(b.index, Some(2));
        assert_eq!(a.hash, [1, 2, 3, 4]);
    }

    #[test]
    fn test_serializes_as_hex() {
        let s = Sample {
            number: 255,
            hash: [0xde, 0xad, 0xbe, 0xef],
            signers: vec![[0x11; 20]],
            index: None,
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["number"], "0xff");
        assert_eq!(json["hash"], "0xdeadbeef");
        assert_eq!(json["signers"][0], format!("0x{}", "11".repeat(20)));
    }

    #[test]
    fn test_wrong_width_rejected() {
        assert!(serde_json::from_str::<Sample>(r#"{"number":1,"hash":"0x0102"}"#).is_err());
    }
}
