use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::constants::{TAGS_MAX, TITLE_MAX};
use crate::error::ContentError;

/// A content record. Everything except the seed and leech counts is
/// immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: u64,
    pub info_hash: String,
    pub title: String,
    pub size: u64,
    pub file_count: u32,
    pub seeders: u32,
    pub leechers: u32,
    /// Unix seconds
    pub upload_date: i64,
    pub tags: String,
    pub meta: String,
}

impl Post {
    /// Write the separator-joined encoding used for hashing. Every field is
    /// followed by `sep`, then `term` closes the record.
    ///
    /// `seed_leech` controls whether the mutable counters are included;
    /// piece hashes are always computed without them.
    pub fn write_canonical<W: Write>(
        &self,
        sep: &str,
        term: &str,
        seed_leech: bool,
        w: &mut W,
    ) -> std::io::Result<()> {
        write!(w, "{}{sep}", self.id)?;
        write!(w, "{}{sep}", self.info_hash)?;
        write!(w, "{}{sep}", self.title)?;
        write!(w, "{}{sep}", self.size)?;
        write!(w, "{}", self.file_count)?;

        if seed_leech {
            write!(w, "{sep}{}{sep}{}", self.seeders, self.leechers)?;
        }

        write!(w, "{sep}{}{sep}", self.upload_date)?;
        write!(w, "{}{sep}", self.tags)?;
        write!(w, "{}{sep}", self.meta)?;
        w.write_all(term.as_bytes())
    }

    pub fn canonical_bytes(&self, sep: &str, term: &str, seed_leech: bool) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.title.len() + self.tags.len());
        // writing into a Vec cannot fail
        let _ = self.write_canonical(sep, term, seed_leech, &mut buf);
        buf
    }

    /// The bytes fed into a piece hash.
    pub fn hash_bytes(&self) -> Vec<u8> {
        self.canonical_bytes("|", "", false)
    }

    pub fn validate(&self) -> Result<(), ContentError> {
        if self.title.len() > TITLE_MAX {
            return Err(ContentError::TitleTooLong(self.title.len()));
        }

        if self.tags.len() > TAGS_MAX {
            return Err(ContentError::TagsTooLong(self.tags.len()));
        }

        if self.upload_date > chrono::Utc::now().timestamp() {
            return Err(ContentError::FutureUploadDate);
        }

        Ok(())
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
