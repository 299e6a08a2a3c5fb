use serde::{Deserialize, Deserializer};

/// Account data as handed over by an upstream provider integration.
///
/// Plex reports numeric ids and calls the display name `title`; Emby and
/// Jellyfin use string ids and `username`/`Name`. Both shapes deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderPayload {
    #[serde(deserialize_with = "id_as_string", alias = "Id")]
    pub id: String,
    #[serde(alias = "title", alias = "Name")]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, alias = "avatar")]
    pub thumb: Option<String>,
}

impl ProviderPayload {
    /// Parse a payload from a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
}

fn id_as_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}
