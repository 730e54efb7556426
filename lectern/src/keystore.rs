use anyhow::{Context, Result, bail};
use log::{info, warn};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

/// Read-only KID to content key mapping, loaded once per run.
#[derive(Clone, Debug, Default)]
pub struct KeyStore {
    keys: HashMap<String, String>,
}

impl KeyStore {
    /// Load a json object of `kid: key` pairs, a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Key file {} doesn't exist, encrypted lectures will fail.",
                path.display()
            );
            return Ok(Self::default());
        }

        let keys = read_map(path)?;
        info!("Loaded {} keys from {}", keys.len(), path.display());
        Ok(Self::from_pairs(keys))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self {
            keys: pairs
                .into_iter()
                .map(|(kid, key)| (normalize(kid.as_ref()), normalize(key.as_ref())))
                .collect(),
        }
    }

    pub fn get(&self, kid: &str) -> Option<&str> {
        self.keys.get(&normalize(kid)).map(|x| x.as_str())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Insert or replace pairs in the key file, returns the number of keys it holds afterwards.
    pub fn upsert(path: &Path, pairs: &[(String, String)]) -> Result<usize> {
        let mut keys = if path.exists() {
            read_map(path)?
        } else {
            BTreeMap::new()
        };

        for (kid, key) in pairs {
            keys.insert(normalize(kid), normalize(key));
        }

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let temp = path.with_extension("json.tmp");
        fs::write(&temp, serde_json::to_string_pretty(&keys)?)?;
        fs::rename(&temp, path)?;
        Ok(keys.len())
    }

    pub fn entries(path: &Path) -> Result<BTreeMap<String, String>> {
        read_map(path)
    }
}

fn read_map(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("couldn't read key file {}", path.display()))?;
    let keys = serde_json::from_str::<BTreeMap<String, String>>(&text)
        .with_context(|| format!("key file {} isn't a json object of strings", path.display()))?;
    Ok(keys
        .into_iter()
        .map(|(kid, key)| (normalize(&kid), normalize(&key)))
        .collect())
}

fn normalize(hex: &str) -> String {
    hex.trim().replace('-', "").to_ascii_lowercase()
}

/// Parse `KID:KEY`, both 32 hex digits.
pub fn parse_pair(s: &str) -> Result<(String, String)> {
    let Some((kid, key)) = s.split_once(':') else {
        bail!("expected KID:KEY, got {:?}.", s);
    };

    let kid = normalize(kid);
    let key = normalize(key);

    if kid.len() == 32
        && key.len() == 32
        && kid.chars().all(|c| c.is_ascii_hexdigit())
        && key.chars().all(|c| c.is_ascii_hexdigit())
    {
        Ok((kid, key))
    } else {
        bail!("invalid kid key format used.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_are_case_insensitive() {
        let store = KeyStore::from_pairs([("AA11BB22-0000-0000-0000-000000000000", "CAFEBABE")]);

        assert_eq!(
            store.get("aa11bb22000000000000000000000000"),
            Some("cafebabe")
        );
        assert_eq!(
            store.get("AA11BB22000000000000000000000000"),
            Some("cafebabe")
        );
        assert_eq!(store.get("bb22"), None);
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::load(&dir.path().join("keyfile.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keyfile.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(KeyStore::load(&path).is_err());
    }

    #[test]
    fn upsert_merges_and_lowercases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys").join("keyfile.json");
        let kid = "A".repeat(32);

        assert_eq!(
            KeyStore::upsert(&path, &[(kid.clone(), "1".repeat(32))]).unwrap(),
            1
        );
        assert_eq!(
            KeyStore::upsert(&path, &[(kid.clone(), "2".repeat(32))]).unwrap(),
            1
        );

        let store = KeyStore::load(&path).unwrap();
        assert_eq!(store.get(&kid), Some("2".repeat(32).as_str()));
    }

    #[test]
    fn pair_parser() {
        let (kid, key) = parse_pair(&format!("{}:{}", "AB".repeat(16), "cd".repeat(16))).unwrap();
        assert_eq!(kid, "ab".repeat(16));
        assert_eq!(key, "cd".repeat(16));

        assert!(parse_pair("abcd").is_err());
        assert!(parse_pair("zz:zz").is_err());
    }
}
