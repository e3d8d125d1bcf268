//! Vault entry ("cipher") model and value extraction rules.
//!
//! The same shape is returned by `GET /api/ciphers` (inside a `data` list) and
//! by `bw get item` / `bw list items`. Older Vaultwarden releases answer with
//! PascalCase keys, so every field also accepts its PascalCase alias.
//!
//! None of these types implement `Debug`: they hold decrypted passwords.

use serde::Deserialize;

/// Entry type discriminant as sent by the vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "i64")]
pub enum EntryType {
    Login,
    SecureNote,
    Card,
    Identity,
    Other(i64),
}

impl From<i64> for EntryType {
    fn from(value: i64) -> Self {
        match value {
            1 => Self::Login,
            2 => Self::SecureNote,
            3 => Self::Card,
            4 => Self::Identity,
            other => Self::Other(other),
        }
    }
}

impl Default for EntryType {
    fn default() -> Self {
        Self::Other(0)
    }
}

#[derive(Clone, Default, Deserialize)]
pub struct LoginUri {
    #[serde(default, alias = "Uri")]
    pub uri: Option<String>,
}

#[derive(Clone, Default, Deserialize)]
pub struct LoginData {
    #[serde(default, alias = "Username")]
    pub username: Option<String>,
    #[serde(default, alias = "Password")]
    pub password: Option<String>,
    #[serde(default, alias = "Uris")]
    pub uris: Option<Vec<LoginUri>>,
}

#[derive(Clone, Default, Deserialize)]
pub struct CustomField {
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(default, alias = "Value")]
    pub value: Option<String>,
    #[serde(default, rename = "type", alias = "Type")]
    pub field_type: Option<i64>,
}

/// One item stored in the vault.
#[derive(Clone, Default, Deserialize)]
pub struct VaultEntry {
    #[serde(default, alias = "Id")]
    pub id: Option<String>,
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(default, rename = "type", alias = "Type")]
    pub entry_type: EntryType,
    #[serde(default, alias = "Login")]
    pub login: Option<LoginData>,
    #[serde(default, alias = "Notes")]
    pub notes: Option<String>,
    #[serde(default, alias = "Fields")]
    pub fields: Option<Vec<CustomField>>,
}

/// Envelope returned by `GET /api/ciphers`.
#[derive(Default, Deserialize)]
pub struct CipherList {
    #[serde(default, alias = "Data")]
    pub data: Vec<VaultEntry>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl VaultEntry {
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    fn password(&self) -> Option<&str> {
        self.login.as_ref().and_then(|login| non_empty(&login.password))
    }

    fn notes(&self) -> Option<&str> {
        non_empty(&self.notes)
    }

    fn fields(&self) -> &[CustomField] {
        self.fields.as_deref().unwrap_or(&[])
    }

    /// Value selection used by the HTTP API strategy.
    ///
    /// Login password, then secure-note body, then the first custom field named
    /// exactly `value` or `secret`, then any notes.
    pub fn api_value(&self) -> Option<&str> {
        if self.entry_type == EntryType::Login {
            if let Some(password) = self.password() {
                return Some(password);
            }
        }

        if self.entry_type == EntryType::SecureNote {
            if let Some(notes) = self.notes() {
                return Some(notes);
            }
        }

        let named = self
            .fields()
            .iter()
            .filter(|field| matches!(field.name.as_deref(), Some("value") | Some("secret")))
            .find_map(|field| non_empty(&field.value));
        if named.is_some() {
            return named;
        }

        self.notes()
    }

    /// Value selection used by the CLI strategy.
    ///
    /// Any login password, then the first field whose name is `value`, `secret`
    /// or `api_key` ignoring case, then notes, then the first field's value.
    pub fn cli_value(&self) -> Option<&str> {
        if let Some(password) = self.password() {
            return Some(password);
        }

        let named = self
            .fields()
            .iter()
            .filter(|field| {
                field.name.as_deref().map(str::to_ascii_lowercase).is_some_and(|name| {
                    matches!(name.as_str(), "value" | "secret" | "api_key")
                })
            })
            .find_map(|field| non_empty(&field.value));
        if named.is_some() {
            return named;
        }

        if let Some(notes) = self.notes() {
            return Some(notes);
        }

        self.fields().first().and_then(|field| non_empty(&field.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(value: serde_json::Value) -> VaultEntry {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_entry_type_discriminants() {
        assert_eq!(EntryType::from(1), EntryType::Login);
        assert_eq!(EntryType::from(2), EntryType::SecureNote);
        assert_eq!(EntryType::from(3), EntryType::Card);
        assert_eq!(EntryType::from(4), EntryType::Identity);
        assert_eq!(EntryType::from(7), EntryType::Other(7));
    }

    #[test]
    fn test_login_password_wins() {
        let e = entry(json!({
            "name": "DB_URL",
            "type": 1,
            "login": {"username": "app", "password": "p@ss"},
            "notes": "ignored",
            "fields": [{"name": "value", "value": "also-ignored", "type": 0}]
        }));

        assert_eq!(e.api_value(), Some("p@ss"));
        assert_eq!(e.cli_value(), Some("p@ss"));
    }

    #[test]
    fn test_secure_note_body() {
        let e = entry(json!({"name": "TLS_KEY", "type": 2, "notes": "-----BEGIN KEY-----"}));
        assert_eq!(e.api_value(), Some("-----BEGIN KEY-----"));
    }

    #[test]
    fn test_empty_secure_note_has_no_value() {
        let e = entry(json!({"name": "EMPTY", "type": 2, "notes": "", "fields": []}));
        assert_eq!(e.api_value(), None);
        assert_eq!(e.cli_value(), None);
    }

    #[test]
    fn test_api_named_field_is_case_sensitive() {
        let upper = entry(json!({
            "name": "TOKEN",
            "type": 3,
            "fields": [{"name": "Secret", "value": "x"}]
        }));
        assert_eq!(upper.api_value(), None);
        assert_eq!(upper.cli_value(), Some("x"));

        let exact = entry(json!({
            "name": "TOKEN",
            "type": 3,
            "fields": [{"name": "other", "value": "o"}, {"name": "secret", "value": "s"}]
        }));
        assert_eq!(exact.api_value(), Some("s"));
    }

    #[test]
    fn test_empty_named_field_falls_through_to_next_match() {
        let e = entry(json!({
            "name": "TOKEN",
            "type": 3,
            "fields": [{"name": "value", "value": ""}, {"name": "secret", "value": "s"}]
        }));
        assert_eq!(e.api_value(), Some("s"));

        let e = entry(json!({
            "name": "TOKEN",
            "type": 2,
            "fields": [
                {"name": "first", "value": "f"},
                {"name": "Value", "value": ""},
                {"name": "API_KEY", "value": "k"}
            ]
        }));
        assert_eq!(e.cli_value(), Some("k"));
    }

    #[test]
    fn test_api_notes_fallback_for_other_types() {
        let e = entry(json!({"name": "CARD", "type": 3, "notes": "4111"}));
        assert_eq!(e.api_value(), Some("4111"));
    }

    #[test]
    fn test_cli_api_key_field_and_first_field_fallback() {
        let api_key = entry(json!({
            "name": "SVC",
            "type": 2,
            "notes": "notes",
            "fields": [{"name": "API_KEY", "value": "k-123"}]
        }));
        assert_eq!(api_key.cli_value(), Some("k-123"));

        let first = entry(json!({
            "name": "SVC",
            "type": 2,
            "fields": [{"name": "token", "value": "first"}, {"name": "other", "value": "second"}]
        }));
        assert_eq!(first.cli_value(), Some("first"));
    }

    #[test]
    fn test_pascal_case_payload() {
        let list: CipherList = serde_json::from_value(json!({
            "Data": [{
                "Id": "abc",
                "Name": "DB_URL",
                "Type": 1,
                "Login": {"Username": "app", "Password": "p@ss", "Uris": [{"Uri": "https://db"}]},
                "Notes": null,
                "Fields": null
            }]
        }))
        .unwrap();

        assert_eq!(list.data.len(), 1);
        assert_eq!(list.data[0].id(), "abc");
        assert_eq!(list.data[0].name(), "DB_URL");
        assert_eq!(list.data[0].api_value(), Some("p@ss"));
    }
}
