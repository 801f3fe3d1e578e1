use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub mod render;
pub mod token;

pub type GameId = i64;

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameRecord {
    #[serde(deserialize_with = "lenient::id")]
    pub id: GameId,
    #[serde(default, deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub icon: String,
    #[serde(rename = "steamId", default, deserialize_with = "lenient::opt_string")]
    pub steam_id: Option<String>,
}

/// Body of a create-or-update request. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct GameSubmission {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub id: Option<GameId>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub icon: Option<String>,
    #[serde(rename = "steamId", default, deserialize_with = "lenient::opt_string")]
    pub steam_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DeleteRequest {
    #[serde(default, deserialize_with = "lenient::opt_id")]
    pub id: Option<GameId>,
}

/// Fields an external catalogue can supply for a store id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameMetadata {
    pub name: Option<String>,
    pub icon: Option<String>,
}

impl GameSubmission {
    /// Take omitted fields from the stored record this submission updates.
    pub fn inherit_from(&mut self, games: &[GameRecord]) {
        let Some(current) = self.id.and_then(|id| games.iter().find(|g| g.id == id)) else {
            return;
        };
        if self.name.is_none() && !current.name.is_empty() {
            self.name = Some(current.name.clone());
        }
        if self.icon.is_none() && !current.icon.is_empty() {
            self.icon = Some(current.icon.clone());
        }
        if self.steam_id.is_none() {
            self.steam_id = current.steam_id.clone();
        }
    }

    /// Store id worth looking up, if the submission is missing a display field.
    pub fn lookup_target(&self) -> Option<&str> {
        if self.name.is_some() && self.icon.is_some() {
            return None;
        }
        self.steam_id.as_deref()
    }

    /// Fill only the fields the caller left out.
    pub fn fill_missing(&mut self, metadata: GameMetadata) {
        if self.name.is_none() {
            self.name = metadata.name.filter(|n| !n.trim().is_empty());
        }
        if self.icon.is_none() {
            self.icon = metadata.icon.filter(|i| !i.trim().is_empty());
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("insufficient game information")]
    InsufficientInfo,
    #[error("{0} is empty after removing markup")]
    BlankField(&'static str),
    #[error("game id required")]
    MissingId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upserted {
    pub id: GameId,
    pub created: bool,
}

static MARKUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<[^>]*>?").expect("markup pattern compiles"));

/// Strip anything that looks like a tag, including an unterminated trailing one.
pub fn sanitize(input: &str) -> String {
    MARKUP.replace_all(input, "").trim().to_string()
}

/// Wall-clock ids, bumped past the current maximum so they stay unique in `games`.
pub fn next_id(games: &[GameRecord], now_ms: i64) -> GameId {
    games
        .iter()
        .map(|g| g.id)
        .max()
        .map_or(now_ms, |max| now_ms.max(max.saturating_add(1)))
}

/// Create or update one record.
///
/// When `submission.id` names an existing record, omitted fields keep that
/// record's values and the record is replaced in place. An unknown id is
/// appended as a new record with a freshly assigned id.
pub fn upsert(
    games: &mut Vec<GameRecord>,
    submission: GameSubmission,
    now_ms: i64,
) -> Result<Upserted, GameError> {
    let existing = submission
        .id
        .and_then(|id| games.iter().position(|g| g.id == id));

    let current = existing.map(|index| &games[index]);
    let name = submission
        .name
        .or_else(|| current.map(|g| g.name.clone()).filter(|n| !n.is_empty()));
    let icon = submission
        .icon
        .or_else(|| current.map(|g| g.icon.clone()).filter(|i| !i.is_empty()));
    let steam_id = submission
        .steam_id
        .or_else(|| current.and_then(|g| g.steam_id.clone()));

    let (Some(name), Some(icon)) = (name, icon) else {
        return Err(GameError::InsufficientInfo);
    };

    let name = sanitize(&name);
    if name.is_empty() {
        return Err(GameError::BlankField("name"));
    }
    let icon = sanitize(&icon);
    if icon.is_empty() {
        return Err(GameError::BlankField("icon"));
    }

    match existing {
        Some(index) => {
            let record = &mut games[index];
            record.name = name;
            record.icon = icon;
            record.steam_id = steam_id;
            Ok(Upserted {
                id: record.id,
                created: false,
            })
        }
        None => {
            let id = next_id(games, now_ms);
            games.push(GameRecord {
                id,
                name,
                icon,
                steam_id,
            });
            Ok(Upserted { id, created: true })
        }
    }
}

/// Drop every record with `id`. Returns whether anything was removed.
pub fn remove(games: &mut Vec<GameRecord>, id: GameId) -> bool {
    let before = games.len();
    games.retain(|g| g.id != id);
    games.len() != before
}

#[derive(Debug, Clone, Default)]
pub struct ParsedList {
    pub games: Vec<GameRecord>,
    pub layout: StoredLayout,
    /// Array entries that were not records. They stay in `layout`.
    pub skipped: usize,
    /// The document was not a JSON array at all.
    pub malformed: bool,
}

/// Every entry of a stored array in its original text.
///
/// Lets a rewrite keep untouched entries byte-for-byte, including ones that
/// never decoded as records.
#[derive(Debug, Clone, Default)]
pub struct StoredLayout {
    entries: Vec<StoredEntry>,
}

#[derive(Debug, Clone)]
enum StoredEntry {
    Game { record: GameRecord, raw: Box<RawValue> },
    Opaque(Box<RawValue>),
}

impl StoredLayout {
    /// Encode `games`, which must derive from this layout's records by in-place
    /// edits, removals and appends.
    pub fn encode(&self, games: &[GameRecord]) -> serde_json::Result<String> {
        let mut out = Vec::with_capacity(self.entries.len().max(games.len()));
        let mut next = 0;
        for entry in &self.entries {
            match entry {
                StoredEntry::Opaque(raw) => out.push(raw.clone()),
                StoredEntry::Game { record, raw } => match games.get(next) {
                    Some(game) if game.id == record.id => {
                        if game == record {
                            out.push(raw.clone());
                        } else {
                            out.push(serde_json::value::to_raw_value(game)?);
                        }
                        next += 1;
                    }
                    // removed
                    _ => {}
                },
            }
        }
        for game in &games[next..] {
            out.push(serde_json::value::to_raw_value(game)?);
        }
        serde_json::to_string(&out)
    }
}

/// Parse a stored document, tolerating junk rather than failing the read.
pub fn parse_list(raw: &str) -> ParsedList {
    let Ok(entries) = serde_json::from_str::<Vec<Box<RawValue>>>(raw) else {
        return ParsedList {
            malformed: true,
            ..ParsedList::default()
        };
    };

    let mut parsed = ParsedList::default();
    for raw in entries {
        match serde_json::from_str::<GameRecord>(raw.get()) {
            Ok(record) => {
                parsed.games.push(record.clone());
                parsed.layout.entries.push(StoredEntry::Game { record, raw });
            }
            Err(_) => {
                parsed.skipped += 1;
                parsed.layout.entries.push(StoredEntry::Opaque(raw));
            }
        }
    }
    parsed
}

/// The two entries a fresh list starts with when seeding is enabled.
pub fn seed_games() -> Vec<GameRecord> {
    vec![
        GameRecord {
            id: 1,
            name: "Ghost Of Tsushima Legend Mode".into(),
            icon: "https://img.122200.xyz/GhostOfTsushima.ico".into(),
            steam_id: None,
        },
        GameRecord {
            id: 2,
            name: "Rise of the Rōnin".into(),
            icon: "https://img.122200.xyz/RiseoftheRonin.png".into(),
            steam_id: None,
        },
    ]
}

mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    use crate::GameId;

    /// Strings or numbers; blank strings and null read as absent.
    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(D::Error::custom(format!("expected string, got {other}"))),
        }
    }

    /// Like [`opt_string`], with absent reading as empty.
    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        opt_string(d).map(Option::unwrap_or_default)
    }

    pub fn id<'de, D: Deserializer<'de>>(d: D) -> Result<GameId, D::Error> {
        opt_id(d)?.ok_or_else(|| D::Error::custom("record has no usable id"))
    }

    /// Numbers or numeric strings, read the way a leading-digit integer parse would.
    pub fn opt_id<'de, D: Deserializer<'de>>(d: D) -> Result<Option<GameId>, D::Error> {
        match Option::<Value>::deserialize(d)? {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64))),
            Some(Value::String(s)) => Ok(leading_integer(&s)),
            Some(other) => Err(D::Error::custom(format!("expected id, got {other}"))),
        }
    }

    fn leading_integer(s: &str) -> Option<GameId> {
        let s = s.trim_start();
        let (sign, digits) = match s.strip_prefix('-') {
            Some(rest) => (-1, rest),
            None => (1, s.strip_prefix('+').unwrap_or(s)),
        };
        let end = digits
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits.len());
        digits[..end].parse::<GameId>().ok().map(|v| v * sign)
    }
}
