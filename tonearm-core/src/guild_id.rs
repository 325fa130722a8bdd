//! Guild ids travel as decimal strings on the wire but are handled as `u64`.

use serde::{de, Deserialize, Deserializer, Serializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum RawGuildId {
    Text(String),
    Number(u64),
}

pub fn serialize<S>(guild_id: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&guild_id.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match RawGuildId::deserialize(deserializer)? {
        RawGuildId::Number(id) => Ok(id),
        RawGuildId::Text(text) => text
            .parse::<u64>()
            .map_err(|_| de::Error::custom(format!("invalid guild id: {}", text))),
    }
}
