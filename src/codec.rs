//! Name Codec (SPEC_FULL.md §4.1): bidirectional translation between
//! cleartext and EncFS-encrypted path components, backed by a persistent
//! cache and an `encfsctl` subprocess for cache misses.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ExternalHelperError, Result};
use crate::exec;

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheData {
    enc_to_clear: HashMap<String, String>,
    clear_to_enc: HashMap<String, String>,
}

/// Per-remote persistent component cache. Owned exclusively by the
/// `NameCodec` it belongs to (spec.md §3 "Ownership").
pub struct NameCache {
    path: PathBuf,
    data: CacheData,
}

impl NameCache {
    /// Lazily loaded: absence or corruption starts from an empty cache and
    /// logs a warning (REDESIGN FLAG in SPEC_FULL.md §REDESIGN FLAGS — the
    /// original silently swallows corruption).
    pub fn load(sync_dir: &Path, remote_name: &str, key: &str) -> Self {
        let mut hasher = Md5::new();
        hasher.update(key.as_bytes());
        let digest = hex::encode(hasher.finalize());
        let path = sync_dir.join(format!("{}-cache-{}", remote_name, digest));
        let data = match fs::read(&path) {
            Ok(bytes) => bincode::deserialize(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, path = %path.display(), "name cache corrupted, starting empty");
                CacheData::default()
            }),
            Err(_) => CacheData::default(),
        };
        NameCache { path, data }
    }

    /// Write the cache back to disk (original: `Remote.save_cache`).
    pub fn save(&self) -> Result<()> {
        let bytes = bincode::serialize(&self.data)
            .map_err(|e| crate::error::SynkrotronError::Other(e.to_string()))?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

/// Translates path components through an EncFS `encfsctl` subprocess,
/// batching all cache misses of a translation call into one invocation
/// (SPEC_FULL.md §4.1 "Why component-level").
pub struct NameCodec<'a> {
    cache: &'a mut NameCache,
    encfs_source: PathBuf,
    key: String,
}

impl<'a> NameCodec<'a> {
    pub fn new(cache: &'a mut NameCache, encfs_source: PathBuf, key: String) -> Self {
        NameCodec {
            cache,
            encfs_source,
            key,
        }
    }

    pub fn encrypt(&mut self, paths: &[String]) -> Result<Vec<String>> {
        self.translate(Direction::Encrypt, paths)
    }

    pub fn decrypt(&mut self, paths: &[String]) -> Result<Vec<String>> {
        self.translate(Direction::Decrypt, paths)
    }

    fn translate(&mut self, dir: Direction, paths: &[String]) -> Result<Vec<String>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }
        let split: Vec<Vec<&str>> = paths.iter().map(|p| p.split('/').collect()).collect();

        let mut uncached: Vec<String> = Vec::new();
        for components in &split {
            for c in components {
                let known = match dir {
                    Direction::Encrypt => self.cache.data.clear_to_enc.contains_key(*c),
                    Direction::Decrypt => self.cache.data.enc_to_clear.contains_key(*c),
                };
                if !known && !uncached.iter().any(|u| u == c) {
                    uncached.push((*c).to_string());
                }
            }
        }

        if !uncached.is_empty() {
            if !exec::require_tool("encfsctl") {
                return Err(crate::error::MountError::ToolMissing("encfsctl").into());
            }
            let command = match dir {
                Direction::Encrypt => "encode",
                Direction::Decrypt => "decode",
            };
            let stdin = uncached.join("\n");
            let extpass = format!("echo {}", self.key);
            let source = self.encfs_source.to_string_lossy().into_owned();
            let args = vec![
                command,
                "--extpass",
                extpass.as_str(),
                source.as_str(),
            ];
            let output = exec::run(
                "encfsctl",
                &args,
                None,
                Some(&stdin),
                true,
                &HashMap::new(),
            )?;
            if output.status != 0 {
                return Err(ExternalHelperError {
                    tool: "encfsctl",
                    reason: format!("exit status {}", output.status),
                }
                .into());
            }
            let text = String::from_utf8_lossy(&output.stdout);
            let mapped: Vec<&str> = text.lines().collect();
            if mapped.len() != uncached.len() {
                return Err(ExternalHelperError {
                    tool: "encfsctl",
                    reason: format!(
                        "expected {} translated components, got {}",
                        uncached.len(),
                        mapped.len()
                    ),
                }
                .into());
            }
            // Extend both cache directions atomically: only commit once all
            // pairs have been computed successfully.
            for (clear, enc) in match dir {
                Direction::Encrypt => uncached.iter().zip(mapped.iter()),
                Direction::Decrypt => mapped.iter().zip(uncached.iter()),
            } {
                self.cache
                    .data
                    .clear_to_enc
                    .insert(clear.to_string(), enc.to_string());
                self.cache
                    .data
                    .enc_to_clear
                    .insert(enc.to_string(), clear.to_string());
            }
        }

        let mut result = Vec::with_capacity(paths.len());
        for components in &split {
            let mut mapped_components = Vec::with_capacity(components.len());
            for c in components {
                let mapped = match dir {
                    Direction::Encrypt => self.cache.data.clear_to_enc.get(*c),
                    Direction::Decrypt => self.cache.data.enc_to_clear.get(*c),
                };
                match mapped {
                    Some(m) => mapped_components.push(m.clone()),
                    None => {
                        return Err(ExternalHelperError {
                            tool: "encfsctl",
                            reason: format!("component \"{}\" was not translated", c),
                        }
                        .into())
                    }
                }
            }
            result.push(mapped_components.join("/"));
        }
        Ok(result)
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// Thin `hex` shim so the crate does not need a full `hex` dependency for
/// a single digest-to-string conversion.
mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{:02x}", b).expect("writing to a String cannot fail");
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_round_trips_inverse_direction() {
        let mut data = CacheData::default();
        data.clear_to_enc.insert("docs".into(), "XyZ1".into());
        data.enc_to_clear.insert("XyZ1".into(), "docs".into());
        assert_eq!(data.clear_to_enc.get("docs").unwrap(), "XyZ1");
        assert_eq!(data.enc_to_clear.get("XyZ1").unwrap(), "docs");
    }

    #[test]
    fn hex_encode_matches_known_digest() {
        let mut hasher = Md5::new();
        hasher.update(b"");
        let digest = hex::encode(hasher.finalize());
        assert_eq!(digest, "d41d8cd98f00b204e9800998ecf8427e");
    }
}
