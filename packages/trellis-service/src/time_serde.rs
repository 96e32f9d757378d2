//! RFC 3339 timestamps on the wire.
//!
//! Attach with `#[serde(with = "crate::time_serde")]`; `option` covers
//! `Option<OffsetDateTime>` fields and keeps `null` round-trippable.

use serde::{Deserialize, Deserializer, Serializer, ser::Error as _};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	serializer.serialize_str(&value.format(&Rfc3339).map_err(S::Error::custom)?)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
	D: Deserializer<'de>,
{
	parse(&String::deserialize(deserializer)?).map_err(serde::de::Error::custom)
}

fn parse(raw: &str) -> Result<OffsetDateTime, time::error::Parse> {
	OffsetDateTime::parse(raw, &Rfc3339)
}

pub mod option {
	use super::*;

	pub fn serialize<S>(value: &Option<OffsetDateTime>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match value {
			Some(value) => super::serialize(value, serializer),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<OffsetDateTime>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<String>::deserialize(deserializer)?
			.map(|raw| parse(&raw).map_err(serde::de::Error::custom))
			.transpose()
	}
}

#[cfg(test)]
mod tests {
	use serde::{Deserialize, Serialize};
	use time::OffsetDateTime;

	#[derive(Debug, PartialEq, Serialize, Deserialize)]
	struct Stamps {
		#[serde(with = "crate::time_serde")]
		at: OffsetDateTime,
		#[serde(with = "crate::time_serde::option")]
		maybe: Option<OffsetDateTime>,
	}

	#[test]
	fn timestamps_round_trip_as_rfc3339_strings() {
		let stamps = Stamps {
			at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
			maybe: None,
		};
		let json = serde_json::to_string(&stamps).unwrap();

		assert_eq!(json, r#"{"at":"2023-11-14T22:13:20Z","maybe":null}"#);
		assert_eq!(serde_json::from_str::<Stamps>(&json).unwrap(), stamps);
	}

	#[test]
	fn malformed_timestamps_are_rejected() {
		assert!(serde_json::from_str::<Stamps>(r#"{"at":"yesterday","maybe":null}"#).is_err());
	}
}
