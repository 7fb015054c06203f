// Finds patterns in your command history
//
// Like when you always run a version_control command, then testing, then
// version_control again. Or when testing piles up around 10am every day.
//
// Mining is a full recompute over the log, so running it twice on the same
// history gives the same rows.

use crate::core::SemanticType;
use crate::db::{Command, CommandRepository, Database, PatternRow};
use crate::error::{Result, TrailError};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

// Need to see something at least 3 times before calling it a pattern
pub const DEFAULT_MIN_FREQUENCY: i64 = 3;

pub const DEFAULT_TIME_SLOT_WINDOW_DAYS: i64 = 30;

pub const DEFAULT_TIME_SLOT_TOP_K: usize = 10;

// Rows pulled from the repository per scan call
const SCAN_PAGE_SIZE: i64 = 1000;

/// Which miner produced a pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKind {
    #[serde(rename = "sequence-2")]
    Sequence2,
    #[serde(rename = "sequence-3")]
    Sequence3,
    #[serde(rename = "time-slot")]
    TimeSlot,
}

impl PatternKind {
    pub const ALL: [PatternKind; 3] = [
        PatternKind::Sequence2,
        PatternKind::Sequence3,
        PatternKind::TimeSlot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Sequence2 => "sequence-2",
            PatternKind::Sequence3 => "sequence-3",
            PatternKind::TimeSlot => "time-slot",
        }
    }

    fn for_length(n: usize) -> Option<Self> {
        match n {
            2 => Some(PatternKind::Sequence2),
            3 => Some(PatternKind::Sequence3),
            _ => None,
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for PatternKind {
    type Err = TrailError;

    fn from_str(s: &str) -> Result<Self> {
        PatternKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| TrailError::Validation(format!("unknown pattern type: {}", s)))
    }
}

/// What a pattern is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternKey {
    /// Consecutive semantic types inside one session
    Sequence(Vec<SemanticType>),
    /// Hour of day (UTC) and the type that keeps showing up then
    TimeSlot { hour: u32, semantic_type: SemanticType },
}

// Stored as "version_control,testing" or "14:testing"
impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self {
            PatternKey::Sequence(types) => {
                let labels: Vec<&str> = types.iter().map(|t| t.as_str()).collect();
                labels.join(",")
            }
            PatternKey::TimeSlot {
                hour,
                semantic_type,
            } => format!("{:02}:{}", hour, semantic_type.as_str()),
        };
        f.pad(&key)
    }
}

impl PatternKey {
    fn parse(kind: PatternKind, raw: &str) -> Result<Self> {
        let invalid = || TrailError::Validation(format!("malformed {} key: {}", kind, raw));

        match kind {
            PatternKind::Sequence2 | PatternKind::Sequence3 => {
                let types = raw
                    .split(',')
                    .map(|label| label.parse::<SemanticType>().map_err(|_| invalid()))
                    .collect::<Result<Vec<_>>>()?;
                Ok(PatternKey::Sequence(types))
            }
            PatternKind::TimeSlot => {
                let (hour, label) = raw.split_once(':').ok_or_else(invalid)?;
                let hour: u32 = hour.parse().map_err(|_| invalid())?;
                if hour > 23 {
                    return Err(invalid());
                }
                let semantic_type = label.parse::<SemanticType>().map_err(|_| invalid())?;
                Ok(PatternKey::TimeSlot {
                    hour,
                    semantic_type,
                })
            }
        }
    }
}

/// A mined pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub kind: PatternKind,
    pub key: PatternKey,
    pub frequency: i64,
    pub last_seen: DateTime<Utc>,
}

impl Pattern {
    /// Semantic types of a sequence pattern, in order
    pub fn sequence(&self) -> Option<&[SemanticType]> {
        match &self.key {
            PatternKey::Sequence(types) => Some(types),
            PatternKey::TimeSlot { .. } => None,
        }
    }
}

impl TryFrom<PatternRow> for Pattern {
    type Error = TrailError;

    fn try_from(row: PatternRow) -> Result<Self> {
        let kind: PatternKind = row.pattern_type.parse()?;
        let key = PatternKey::parse(kind, &row.pattern_key)?;

        Ok(Pattern {
            kind,
            key,
            frequency: row.frequency,
            last_seen: row.last_seen,
        })
    }
}

/// Ordering for listings: most frequent, then most recently seen, then key
pub fn compare_patterns(a: &Pattern, b: &Pattern) -> Ordering {
    b.frequency
        .cmp(&a.frequency)
        .then_with(|| b.last_seen.cmp(&a.last_seen))
        .then_with(|| a.key.to_string().cmp(&b.key.to_string()))
        .then_with(|| a.kind.as_str().cmp(b.kind.as_str()))
}

pub fn sort_patterns(patterns: &mut [Pattern]) {
    patterns.sort_by(compare_patterns);
}

/// Miner knobs
#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub min_frequency: i64,
    pub time_slot_window_days: i64,
    pub time_slot_top_k: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            min_frequency: DEFAULT_MIN_FREQUENCY,
            time_slot_window_days: DEFAULT_TIME_SLOT_WINDOW_DAYS,
            time_slot_top_k: DEFAULT_TIME_SLOT_TOP_K,
        }
    }
}

/// Result of one mining pass
#[derive(Debug, Clone)]
pub struct MiningReport {
    pub commands_scanned: usize,
    pub sessions_scanned: usize,
    pub patterns: Vec<Pattern>,
}

pub struct PatternMiner {
    db: Arc<Database>,
    config: MinerConfig,
}

impl PatternMiner {
    pub fn new(db: Arc<Database>, config: MinerConfig) -> Self {
        Self { db, config }
    }

    // Main function - mines everything and stores what qualifies
    pub async fn mine(&self, now: DateTime<Utc>) -> Result<MiningReport> {
        let commands = self.load_history().await?;
        let by_session = group_by_session(&commands);

        let mut patterns = Vec::new();
        for n in [2, 3] {
            patterns.extend(mine_sequences(&by_session, n, self.config.min_frequency));
        }
        patterns.extend(mine_time_slots(
            &commands,
            now,
            self.config.time_slot_window_days,
            self.config.min_frequency,
            self.config.time_slot_top_k,
        ));
        sort_patterns(&mut patterns);

        self.db.replace_patterns(&PatternKind::ALL, &patterns).await?;

        tracing::info!(
            commands = commands.len(),
            sessions = by_session.len(),
            patterns = patterns.len(),
            "pattern mining finished"
        );

        Ok(MiningReport {
            commands_scanned: commands.len(),
            sessions_scanned: by_session.len(),
            patterns,
        })
    }

    /// Stored patterns in listing order
    pub async fn list(&self, kind: Option<PatternKind>, limit: usize) -> Result<Vec<Pattern>> {
        self.db.get_patterns(kind, limit).await
    }

    // Pages through the whole log with the repository cursor
    async fn load_history(&self) -> Result<Vec<Command>> {
        let mut commands = Vec::new();
        let mut cursor = None;

        loop {
            let page = self.db.scan(None, cursor, SCAN_PAGE_SIZE).await?;
            let done = (page.len() as i64) < SCAN_PAGE_SIZE;
            cursor = page.last().map(|c| c.id).or(cursor);
            commands.extend(page);
            if done {
                break;
            }
        }

        Ok(commands)
    }
}

/// Commands grouped per session, each group in `seq` order
pub fn group_by_session(commands: &[Command]) -> BTreeMap<&str, Vec<&Command>> {
    let mut sessions: BTreeMap<&str, Vec<&Command>> = BTreeMap::new();

    for cmd in commands {
        sessions.entry(cmd.session_id.as_str()).or_default().push(cmd);
    }
    for group in sessions.values_mut() {
        group.sort_by_key(|c| c.seq);
    }

    sessions
}

/// Count overlapping n-windows of semantic types, never crossing sessions
pub fn mine_sequences(
    sessions: &BTreeMap<&str, Vec<&Command>>,
    n: usize,
    min_frequency: i64,
) -> Vec<Pattern> {
    let Some(kind) = PatternKind::for_length(n) else {
        return Vec::new();
    };

    let mut counts: HashMap<Vec<SemanticType>, (i64, DateTime<Utc>)> = HashMap::new();

    for commands in sessions.values() {
        for window in commands.windows(n) {
            let key: Vec<SemanticType> = window.iter().map(|c| c.semantic_type).collect();
            let seen = window[n - 1].start_time;

            let entry = counts.entry(key).or_insert((0, seen));
            entry.0 += 1;
            if seen > entry.1 {
                entry.1 = seen;
            }
        }
    }

    let mut patterns: Vec<Pattern> = counts
        .into_iter()
        .filter(|(_, (count, _))| *count >= min_frequency)
        .map(|(types, (frequency, last_seen))| Pattern {
            kind,
            key: PatternKey::Sequence(types),
            frequency,
            last_seen,
        })
        .collect();

    sort_patterns(&mut patterns);
    patterns
}

/// Count (hour, type) pairs over the trailing window and keep the top K
pub fn mine_time_slots(
    commands: &[Command],
    now: DateTime<Utc>,
    window_days: i64,
    min_frequency: i64,
    top_k: usize,
) -> Vec<Pattern> {
    let since = now - Duration::days(window_days);
    let mut counts: HashMap<(u32, SemanticType), (i64, DateTime<Utc>)> = HashMap::new();

    for cmd in commands
        .iter()
        .filter(|c| c.start_time >= since && c.start_time <= now)
    {
        let entry = counts
            .entry((cmd.start_time.hour(), cmd.semantic_type))
            .or_insert((0, cmd.start_time));
        entry.0 += 1;
        if cmd.start_time > entry.1 {
            entry.1 = cmd.start_time;
        }
    }

    let mut patterns: Vec<Pattern> = counts
        .into_iter()
        .filter(|(_, (count, _))| *count >= min_frequency)
        .map(|((hour, semantic_type), (frequency, last_seen))| Pattern {
            kind: PatternKind::TimeSlot,
            key: PatternKey::TimeSlot {
                hour,
                semantic_type,
            },
            frequency,
            last_seen,
        })
        .collect();

    sort_patterns(&mut patterns);
    patterns.truncate(top_k);
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify;
    use crate::db::NewCommand;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
    }

    fn command(id: i64, session: &str, seq: i64, text: &str, start_time: DateTime<Utc>) -> Command {
        Command {
            id,
            session_id: session.to_string(),
            seq,
            text: text.to_string(),
            directory: "/repo".to_string(),
            semantic_type: classify(text),
            sensitive: false,
            complexity: 1,
            git_branch: None,
            start_time,
            exit_code: Some(0),
            duration_ms: Some(5),
        }
    }

    fn git_test_git(session: &str, first_id: i64, start: DateTime<Utc>) -> Vec<Command> {
        ["git add .", "cargo test", "git push"]
            .iter()
            .enumerate()
            .map(|(i, text)| {
                command(
                    first_id + i as i64,
                    session,
                    i as i64 + 1,
                    text,
                    start + Duration::minutes(i as i64),
                )
            })
            .collect()
    }

    #[test]
    fn test_sequence_counts_across_sessions() {
        let mut commands = git_test_git("a", 1, at(9, 0));
        commands.extend(git_test_git("b", 10, at(10, 0)));
        commands.extend(git_test_git("c", 20, at(11, 0)));
        let sessions = group_by_session(&commands);

        let pairs = mine_sequences(&sessions, 2, 3);
        assert_eq!(pairs.len(), 2);
        assert!(pairs.iter().all(|p| p.frequency == 3));

        let triples = mine_sequences(&sessions, 3, 3);
        assert_eq!(triples.len(), 1);
        assert_eq!(
            triples[0].key,
            PatternKey::Sequence(vec![
                SemanticType::VersionControl,
                SemanticType::Testing,
                SemanticType::VersionControl,
            ])
        );
        assert_eq!(triples[0].last_seen, at(11, 2));
    }

    #[test]
    fn test_windows_do_not_cross_sessions() {
        // a: [vc]   b: [testing]  never forms a vc->testing pair
        let commands = vec![
            command(1, "a", 1, "git status", at(9, 0)),
            command(2, "b", 1, "npm test", at(9, 1)),
            command(3, "a", 2, "git log", at(9, 2)),
        ];
        let sessions = group_by_session(&commands);

        let pairs = mine_sequences(&sessions, 2, 1);
        assert_eq!(pairs.len(), 1);
        assert_eq!(
            pairs[0].key,
            PatternKey::Sequence(vec![SemanticType::VersionControl, SemanticType::VersionControl])
        );
    }

    #[test]
    fn test_threshold_filters() {
        let commands = git_test_git("a", 1, at(9, 0));
        let sessions = group_by_session(&commands);

        assert!(mine_sequences(&sessions, 2, 2).is_empty());
        assert_eq!(mine_sequences(&sessions, 2, 1).len(), 2);
    }

    #[test]
    fn test_tie_break_recent_then_key() {
        let older = Pattern {
            kind: PatternKind::Sequence2,
            key: PatternKey::Sequence(vec![SemanticType::Testing, SemanticType::Building]),
            frequency: 4,
            last_seen: at(9, 0),
        };
        let newer = Pattern {
            last_seen: at(10, 0),
            key: PatternKey::Sequence(vec![SemanticType::VersionControl, SemanticType::Testing]),
            ..older.clone()
        };
        let same_time = Pattern {
            key: PatternKey::Sequence(vec![SemanticType::Building, SemanticType::Testing]),
            ..older.clone()
        };
        let frequent = Pattern {
            frequency: 9,
            last_seen: at(1, 0),
            ..older.clone()
        };

        let mut patterns = vec![older.clone(), same_time.clone(), newer.clone(), frequent.clone()];
        sort_patterns(&mut patterns);

        assert_eq!(patterns, vec![frequent, newer, same_time, older]);
    }

    #[test]
    fn test_time_slots() {
        let now = at(23, 0);
        let mut commands = Vec::new();
        for i in 0..4 {
            commands.push(command(i, "a", i, "cargo test", at(10, i as u32)));
        }
        for i in 4..6 {
            commands.push(command(i, "a", i, "git pull", at(14, i as u32)));
        }
        // outside the trailing window
        for i in 6..10 {
            commands.push(command(
                i,
                "a",
                i,
                "docker ps",
                at(10, 0) - Duration::days(45),
            ));
        }

        let slots = mine_time_slots(&commands, now, 30, 3, 10);
        assert_eq!(slots.len(), 1);
        assert_eq!(
            slots[0].key,
            PatternKey::TimeSlot {
                hour: 10,
                semantic_type: SemanticType::Testing
            }
        );
        assert_eq!(slots[0].frequency, 4);

        let top_one = mine_time_slots(&commands, now, 30, 1, 1);
        assert_eq!(top_one.len(), 1);
        assert_eq!(top_one[0].frequency, 4);
    }

    #[test]
    fn test_key_round_trip_through_storage_format() {
        let key = PatternKey::TimeSlot {
            hour: 7,
            semantic_type: SemanticType::Container,
        };
        assert_eq!(key.to_string(), "07:container");
        assert_eq!(PatternKey::parse(PatternKind::TimeSlot, "07:container").unwrap(), key);
        assert!(PatternKey::parse(PatternKind::TimeSlot, "25:container").is_err());
        assert!(PatternKey::parse(PatternKind::Sequence2, "testing,bogus").is_err());
    }

    async fn seeded_miner() -> (PatternMiner, Arc<Database>) {
        let db = Arc::new(Database::new_test().await.unwrap());

        for (s, session) in ["a", "b", "c"].iter().enumerate() {
            for (i, text) in ["git add .", "git commit -m wip", "cargo test"].iter().enumerate() {
                db.append(NewCommand {
                    session_id: session.to_string(),
                    seq: i as i64 + 1,
                    text: text.to_string(),
                    directory: "/repo".to_string(),
                    semantic_type: classify(text),
                    sensitive: false,
                    complexity: 1,
                    git_branch: None,
                    start_time: at(9 + s as u32, i as u32),
                })
                .await
                .unwrap();
            }
        }

        let miner = PatternMiner::new(Arc::clone(&db), MinerConfig::default());
        (miner, db)
    }

    #[tokio::test]
    async fn test_mine_is_idempotent() {
        let (miner, _db) = seeded_miner().await;
        let now = at(23, 0);

        miner.mine(now).await.unwrap();
        let first = miner.list(None, 100).await.unwrap();

        miner.mine(now).await.unwrap();
        let second = miner.list(None, 100).await.unwrap();

        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_mine_drops_patterns_that_no_longer_qualify() {
        let (_, db) = seeded_miner().await;
        let now = at(23, 0);

        let lenient = PatternMiner::new(
            Arc::clone(&db),
            MinerConfig {
                min_frequency: 1,
                ..MinerConfig::default()
            },
        );
        lenient.mine(now).await.unwrap();
        let many = lenient.list(None, 100).await.unwrap().len();

        let strict = PatternMiner::new(Arc::clone(&db), MinerConfig::default());
        strict.mine(now).await.unwrap();
        let few = strict.list(None, 100).await.unwrap();

        assert!(few.len() < many);
        assert!(few.iter().all(|p| p.frequency >= DEFAULT_MIN_FREQUENCY));
    }

    #[tokio::test]
    async fn test_list_by_kind() {
        let (miner, _db) = seeded_miner().await;
        miner.mine(at(23, 0)).await.unwrap();

        let triples = miner.list(Some(PatternKind::Sequence3), 10).await.unwrap();
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].frequency, 3);
    }
}
