use common::tuf::{Gun, RoleName};

/// Separates the repository name from the metadata file in a TUF route
const TUF_SEGMENT: &str = "/_trust/tuf/";
const JSON_SUFFIX: &str = ".json";
const KEY_SUFFIX: &str = ".key";
const CHECKSUM_LEN: usize = 64;

/// What a `/v2/...` path addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TufPath {
    /// `{gun}/_trust/tuf/`
    Batch { gun: Gun },
    /// `{gun}/_trust/tuf/{role}.json`
    Current { gun: Gun, role: RoleName },
    /// `{gun}/_trust/tuf/{version}.{role}.json`
    Version {
        gun: Gun,
        role: RoleName,
        version: u64,
    },
    /// `{gun}/_trust/tuf/{role}.{checksum}.json`
    Checksum {
        gun: Gun,
        role: RoleName,
        checksum: String,
    },
    /// `{gun}/_trust/tuf/{role}.key`
    Key { gun: Gun, role: RoleName },
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("not a TUF route: {0}")]
    NotTuf(String),
    #[error("invalid repository name: {0}")]
    InvalidGun(String),
    #[error("invalid role: {0}")]
    InvalidRole(String),
}

impl TufPath {
    /// Parse the part of the URI after `/v2/`
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let path = path.trim_start_matches('/');
        let Some((gun, file)) = path.split_once(TUF_SEGMENT) else {
            // `{gun}/_trust/tuf` without the trailing slash is still a batch route
            return match path.strip_suffix(TUF_SEGMENT.trim_end_matches('/')) {
                Some(gun) => Ok(TufPath::Batch {
                    gun: parse_gun(gun)?,
                }),
                None => Err(PathError::NotTuf(path.to_string())),
            };
        };
        let gun = parse_gun(gun)?;

        if file.is_empty() {
            return Ok(TufPath::Batch { gun });
        }

        if let Some(role) = file.strip_suffix(KEY_SUFFIX) {
            return Ok(TufPath::Key {
                gun,
                role: parse_role(role)?,
            });
        }

        let Some(stem) = file.strip_suffix(JSON_SUFFIX) else {
            return Err(PathError::NotTuf(path.to_string()));
        };

        if let Some((prefix, role)) = stem.split_once('.') {
            if !prefix.is_empty() && prefix.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(version) = prefix.parse::<u64>() {
                    return Ok(TufPath::Version {
                        gun,
                        role: parse_role(role)?,
                        version,
                    });
                }
            }
        }

        if let Some((role, checksum)) = stem.rsplit_once('.') {
            if checksum.len() == CHECKSUM_LEN && checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Ok(TufPath::Checksum {
                    gun,
                    role: parse_role(role)?,
                    checksum: checksum.to_ascii_lowercase(),
                });
            }
        }

        Ok(TufPath::Current {
            gun,
            role: parse_role(stem)?,
        })
    }

    pub fn gun(&self) -> &Gun {
        match self {
            TufPath::Batch { gun }
            | TufPath::Current { gun, .. }
            | TufPath::Version { gun, .. }
            | TufPath::Checksum { gun, .. }
            | TufPath::Key { gun, .. } => gun,
        }
    }
}

fn parse_gun(gun: &str) -> Result<Gun, PathError> {
    Gun::parse(gun).map_err(|_| PathError::InvalidGun(gun.to_string()))
}

fn parse_role(role: &str) -> Result<RoleName, PathError> {
    RoleName::parse(role).map_err(|_| PathError::InvalidRole(role.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUN: &str = "quay.io/signingUser/testRepo";

    fn gun() -> Gun {
        Gun::parse(GUN).unwrap()
    }

    #[test]
    fn test_parse_routes() {
        assert_eq!(
            TufPath::parse(&format!("{}/_trust/tuf/", GUN)).unwrap(),
            TufPath::Batch { gun: gun() }
        );
        assert_eq!(
            TufPath::parse(&format!("{}/_trust/tuf", GUN)).unwrap(),
            TufPath::Batch { gun: gun() }
        );
        assert_eq!(
            TufPath::parse(&format!("{}/_trust/tuf/root.json", GUN)).unwrap(),
            TufPath::Current {
                gun: gun(),
                role: RoleName::root()
            }
        );
        assert_eq!(
            TufPath::parse(&format!("{}/_trust/tuf/targets/releases.json", GUN)).unwrap(),
            TufPath::Current {
                gun: gun(),
                role: RoleName::releases()
            }
        );
        assert_eq!(
            TufPath::parse(&format!("{}/_trust/tuf/3.snapshot.json", GUN)).unwrap(),
            TufPath::Version {
                gun: gun(),
                role: RoleName::snapshot(),
                version: 3
            }
        );
        assert_eq!(
            TufPath::parse(&format!("{}/_trust/tuf/timestamp.key", GUN)).unwrap(),
            TufPath::Key {
                gun: gun(),
                role: RoleName::timestamp()
            }
        );
    }

    #[test]
    fn test_parse_checksum() {
        let sum = "AB".repeat(32);
        assert_eq!(
            TufPath::parse(&format!("{}/_trust/tuf/targets.{}.json", GUN, sum)).unwrap(),
            TufPath::Checksum {
                gun: gun(),
                role: RoleName::targets(),
                checksum: "ab".repeat(32),
            }
        );
    }

    #[test]
    fn test_parse_rejects() {
        assert!(matches!(
            TufPath::parse(&format!("{}/_trust/tuf/nope.json", GUN)),
            Err(PathError::InvalidRole(_))
        ));
        assert!(matches!(
            TufPath::parse(&format!("{}/_trust/tuf/root.txt", GUN)),
            Err(PathError::NotTuf(_))
        ));
        assert!(matches!(
            TufPath::parse(GUN),
            Err(PathError::NotTuf(_))
        ));
    }
}
