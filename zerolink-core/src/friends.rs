//! Friend registry.
//!
//! Friends are `(pk_hex, nickname)` pairs kept in insertion order and
//! persisted to `friends.dat` as `pk_hex,nickname` lines. Every mutation
//! rewrites the whole file, so the file and the in-memory table are equal
//! whenever a mutation returns. `is_friend` is the authorisation predicate
//! for every inbound and outbound peer connection.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::identity::is_valid_pk_hex;

/// Friend table capacity.
pub const MAX_FRIENDS: usize = 50;
/// Longest accepted nickname, in bytes.
pub const MAX_NICKNAME_LEN: usize = 31;
/// Nickname reported for a pk_hex that is not in the table.
pub const UNKNOWN_USER: &str = "unknown user";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friend {
    pub pk_hex: String,
    pub nickname: String,
}

pub struct FriendRegistry {
    path: PathBuf,
    friends: Vec<Friend>,
}

impl FriendRegistry {
    /// Load the registry from `path`. A missing file is an empty table.
    /// Malformed lines are skipped; over-long nicknames from foreign files
    /// are truncated to [`MAX_NICKNAME_LEN`].
    pub fn load(path: &Path) -> io::Result<Self> {
        let mut friends = Vec::new();
        match fs::read_to_string(path) {
            Ok(contents) => {
                for line in contents.lines() {
                    if friends.len() >= MAX_FRIENDS {
                        break;
                    }
                    let Some((pk_hex, nickname)) = line.split_once(',') else {
                        continue;
                    };
                    if !is_valid_pk_hex(pk_hex) {
                        continue;
                    }
                    let mut nickname = nickname.to_string();
                    if nickname.len() > MAX_NICKNAME_LEN {
                        let mut cut = MAX_NICKNAME_LEN;
                        while !nickname.is_char_boundary(cut) {
                            cut -= 1;
                        }
                        nickname.truncate(cut);
                    }
                    friends.push(Friend {
                        pk_hex: pk_hex.to_string(),
                        nickname,
                    });
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(Self {
            path: path.to_path_buf(),
            friends,
        })
    }

    /// Add a friend and rewrite the file. Rejects malformed keys, over-long
    /// nicknames, duplicates, and a full table.
    pub fn add(&mut self, pk_hex: &str, nickname: &str) -> Result<(), Error> {
        if !is_valid_pk_hex(pk_hex) {
            return Err(Error::InvalidPublicKey);
        }
        if nickname.is_empty() || nickname.contains(['\n', ',']) {
            return Err(Error::InvalidNickname);
        }
        if nickname.len() > MAX_NICKNAME_LEN {
            return Err(Error::NicknameTooLong);
        }
        if self.friends.len() >= MAX_FRIENDS {
            return Err(Error::FriendTableFull);
        }
        if self.is_friend(pk_hex) {
            return Err(Error::DuplicateFriend(pk_hex.to_string()));
        }
        self.friends.push(Friend {
            pk_hex: pk_hex.to_string(),
            nickname: nickname.to_string(),
        });
        if let Err(e) = self.save() {
            self.friends.pop();
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove the first friend with the given nickname and rewrite the
    /// file. Returns the removed entry.
    pub fn delete_by_name(&mut self, nickname: &str) -> Result<Friend, Error> {
        let idx = self
            .friends
            .iter()
            .position(|f| f.nickname == nickname)
            .ok_or_else(|| Error::UnknownFriend(nickname.to_string()))?;
        let removed = self.friends.remove(idx);
        if let Err(e) = self.save() {
            self.friends.insert(idx, removed);
            return Err(e.into());
        }
        Ok(removed)
    }

    fn save(&self) -> io::Result<()> {
        let mut out = String::new();
        for f in &self.friends {
            out.push_str(&f.pk_hex);
            out.push(',');
            out.push_str(&f.nickname);
            out.push('\n');
        }
        fs::write(&self.path, out)
    }

    pub fn pk_by_name(&self, nickname: &str) -> Option<&str> {
        self.friends
            .iter()
            .find(|f| f.nickname == nickname)
            .map(|f| f.pk_hex.as_str())
    }

    /// Nickname for a pk_hex, or the [`UNKNOWN_USER`] sentinel.
    pub fn name_by_pk(&self, pk_hex: &str) -> &str {
        self.friends
            .iter()
            .find(|f| f.pk_hex == pk_hex)
            .map(|f| f.nickname.as_str())
            .unwrap_or(UNKNOWN_USER)
    }

    pub fn is_friend(&self, pk_hex: &str) -> bool {
        self.friends.iter().any(|f| f.pk_hex == pk_hex)
    }

    /// Friends in insertion order.
    pub fn friends(&self) -> &[Friend] {
        &self.friends
    }

    pub fn len(&self) -> usize {
        self.friends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.friends.is_empty()
    }
}
