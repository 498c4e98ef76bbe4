use std::path::Path;

use anyhow::Context;

/// Reads a TOML file into `T`. A missing file yields `T::default()`.
pub fn load_from_file<T>(path: impl AsRef<Path>) -> anyhow::Result<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    let path = path.as_ref();
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("{} does not exist, using the defaults", path.display());
            return Ok(T::default());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("cannot read {}", path.display()));
        }
    };

    toml::from_str(&data).with_context(|| format!("cannot parse {}", path.display()))
}
