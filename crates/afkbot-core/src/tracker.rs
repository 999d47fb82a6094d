use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{
    domain::{Author, UserId},
    errors::Error,
    ports::Clock,
    rank::{RankConfigSource, RankTier},
    store::{AfkStore, StoreData, UserRecord},
    Result,
};

pub const MAX_AFK_MESSAGE_CHARS: usize = 500;
pub const LEADERBOARD_MIN: usize = 1;
pub const LEADERBOARD_MAX: usize = 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AfkStarted {
    pub user_id: UserId,
    pub display_name: String,
    pub started_at: DateTime<Utc>,
    pub message: Option<String>,
    pub session_count: u64,
}

/// Result of an Away user becoming active again.
#[derive(Clone, Debug, PartialEq)]
pub struct AwardOutcome {
    pub user_id: UserId,
    pub reward: u64,
    pub total_exp: u64,
    pub elapsed_seconds: u64,
    pub message: Option<String>,
    pub rank: RankTier,
    pub next_rank: Option<RankTier>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Activity {
    /// The user was not AFK; nothing was awarded.
    Idle,
    Returned(AwardOutcome),
}

/// What an activity changed, and whether the change reached the store.
///
/// A failed write does not undo the change: memory keeps it and the next
/// successful save carries it.
#[derive(Debug)]
pub struct ActivityResult {
    pub activity: Activity,
    /// `Err(StoreWriteFailed)` when the change is held in memory only.
    pub persisted: Result<()>,
}

/// What to tell someone who mentioned an AFK user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AfkNotice {
    pub user_id: UserId,
    pub display_name: String,
    pub message: Option<String>,
    pub since: DateTime<Utc>,
    pub elapsed_seconds: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UserStatus {
    pub record: UserRecord,
    pub rank: RankTier,
    pub next_rank: Option<RankTier>,
    pub exp_to_next: Option<u64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LeaderboardRow {
    /// 1-based.
    pub position: usize,
    pub record: UserRecord,
    pub rank: RankTier,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Leaderboard {
    pub rows: Vec<LeaderboardRow>,
    pub total_users: usize,
}

/// Owns every user record and the EXP ledger.
///
/// All mutations run under one lock, store write included, so two events for
/// the same user are applied strictly one after the other.
pub struct AfkTracker {
    store: Arc<dyn AfkStore>,
    ranks: Arc<RankConfigSource>,
    clock: Arc<dyn Clock>,
    state: Mutex<StoreData>,
}

impl AfkTracker {
    pub fn open(
        store: Arc<dyn AfkStore>,
        ranks: Arc<RankConfigSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let data = store.load()?;
        tracing::info!(users = data.users.len(), "afk records loaded");
        Ok(Self {
            store,
            ranks,
            clock,
            state: Mutex::new(data),
        })
    }

    pub async fn set_afk(&self, author: &Author, message: Option<&str>) -> Result<AfkStarted> {
        let user_id = author.id;
        let now = self.clock.now();
        let mut st = self.state.lock().await;
        remember(&mut st, author);
        let rec = st
            .users
            .entry(user_id)
            .or_insert_with(|| UserRecord::new(user_id, ""));

        if let Some(since) = rec.session.away_since() {
            return Err(Error::AlreadyAfk { since });
        }

        let message = normalize_message(message);
        rec.afk_session_count += 1;
        rec.session.is_afk = true;
        rec.session.started_at = Some(now);
        rec.session.message = message.clone();

        let started = AfkStarted {
            user_id,
            display_name: rec.display_name.clone(),
            started_at: now,
            message,
            session_count: rec.afk_session_count,
        };

        tracing::info!(user = %user_id, "afk set");
        self.persist(&st)?;
        Ok(started)
    }

    /// Called for every observed action of a user.
    ///
    /// Never fails outright: a store write failure is reported in
    /// [`ActivityResult::persisted`] next to the outcome it could not save.
    pub async fn on_activity(&self, author: &Author) -> ActivityResult {
        let user_id = author.id;
        let now = self.clock.now();
        let mut st = self.state.lock().await;

        let refreshed = remember(&mut st, author);
        let rec = st
            .users
            .entry(user_id)
            .or_insert_with(|| UserRecord::new(user_id, ""));

        let Some(started_at) = rec.session.away_since() else {
            let persisted = if refreshed { self.persist(&st) } else { Ok(()) };
            return ActivityResult {
                activity: Activity::Idle,
                persisted,
            };
        };

        let elapsed_seconds = (now - started_at).num_seconds().max(0) as u64;
        let ranks = self.ranks.current();
        let reward = ranks.reward_for(elapsed_seconds as f64 / 60.0);

        rec.exp = rec.exp.saturating_add(reward);
        rec.total_afk_seconds = rec.total_afk_seconds.saturating_add(elapsed_seconds);
        rec.session.is_afk = false;
        rec.session.started_at = None;
        rec.session.ended_at = Some(now);
        let message = rec.session.message.take();

        let outcome = AwardOutcome {
            user_id,
            reward,
            total_exp: rec.exp,
            elapsed_seconds,
            message,
            rank: ranks.rank_for(rec.exp).clone(),
            next_rank: ranks.next_rank(rec.exp).cloned(),
        };

        tracing::info!(
            user = %user_id,
            elapsed_seconds,
            reward,
            total_exp = outcome.total_exp,
            "returned from afk"
        );
        ActivityResult {
            activity: Activity::Returned(outcome),
            persisted: self.persist(&st),
        }
    }

    /// Resolve an `@username` (with or without the `@`) to a known user.
    pub async fn user_by_username(&self, username: &str) -> Option<UserId> {
        let wanted = username.trim().trim_start_matches('@');
        if wanted.is_empty() {
            return None;
        }
        let st = self.state.lock().await;
        st.users
            .values()
            .find(|rec| same_username(rec.username.as_deref(), wanted))
            .map(|rec| rec.user_id)
    }

    /// AFK details for a mentioned user, if they are away.
    pub async fn afk_notice(&self, user_id: UserId) -> Option<AfkNotice> {
        let now = self.clock.now();
        let st = self.state.lock().await;
        let rec = st.users.get(&user_id)?;
        let since = rec.session.away_since()?;
        Some(AfkNotice {
            user_id,
            display_name: rec.display_name.clone(),
            message: rec.session.message.clone(),
            since,
            elapsed_seconds: (now - since).num_seconds().max(0) as u64,
        })
    }

    /// Snapshot of a user's record; unseen users get a zero record that is
    /// not persisted.
    pub async fn status_of(&self, user_id: UserId) -> UserStatus {
        let record = {
            let st = self.state.lock().await;
            st.users
                .get(&user_id)
                .cloned()
                .unwrap_or_else(|| UserRecord::new(user_id, ""))
        };
        let ranks = self.ranks.current();
        UserStatus {
            rank: ranks.rank_for(record.exp).clone(),
            next_rank: ranks.next_rank(record.exp).cloned(),
            exp_to_next: ranks.exp_to_next(record.exp),
            record,
        }
    }

    /// Users who have been AFK at least once or hold EXP, by EXP descending,
    /// ties by user id ascending. `total_users` counts the same population.
    pub async fn leaderboard(&self, limit: i64) -> Leaderboard {
        let limit = clamp_limit(limit);
        let mut records = {
            let st = self.state.lock().await;
            st.users
                .values()
                .filter(|rec| rec.afk_session_count > 0 || rec.exp > 0)
                .cloned()
                .collect::<Vec<_>>()
        };
        let total_users = records.len();
        records.sort_by(|a, b| b.exp.cmp(&a.exp).then(a.user_id.cmp(&b.user_id)));
        records.truncate(limit);

        let ranks = self.ranks.current();
        let rows = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| LeaderboardRow {
                position: i + 1,
                rank: ranks.rank_for(record.exp).clone(),
                record,
            })
            .collect();

        Leaderboard { rows, total_users }
    }

    /// Write the full record set. On failure the in-memory state is kept, so
    /// the next successful save carries this mutation.
    fn persist(&self, data: &StoreData) -> Result<()> {
        self.store.save(data).inspect_err(|e| {
            tracing::error!(error = %e, "failed to persist afk records");
        })
    }
}

/// Create or refresh `author`'s record. Returns whether anything changed.
///
/// A username belongs to one account at a time; claiming it releases it from
/// any other record.
fn remember(data: &mut StoreData, author: &Author) -> bool {
    let mut changed = false;

    if let Some(username) = author.username.as_deref() {
        let known = data
            .users
            .get(&author.id)
            .is_some_and(|rec| rec.username.as_deref() == Some(username));
        if !known {
            for rec in data.users.values_mut() {
                if rec.user_id != author.id && same_username(rec.username.as_deref(), username) {
                    rec.username = None;
                }
            }
        }
    }

    let rec = data.users.entry(author.id).or_insert_with(|| {
        changed = true;
        UserRecord::new(author.id, "")
    });
    if !author.display_name.is_empty() && rec.display_name != author.display_name {
        rec.display_name = author.display_name.clone();
        changed = true;
    }
    if author.username.is_some() && rec.username != author.username {
        rec.username = author.username.clone();
        changed = true;
    }
    changed
}

/// Usernames compare case-insensitively.
fn same_username(stored: Option<&str>, wanted: &str) -> bool {
    stored.is_some_and(|u| u.eq_ignore_ascii_case(wanted))
}

fn normalize_message(message: Option<&str>) -> Option<String> {
    let m = message?.trim();
    if m.is_empty() {
        return None;
    }
    Some(m.chars().take(MAX_AFK_MESSAGE_CHARS).collect())
}

pub fn clamp_limit(limit: i64) -> usize {
    limit.clamp(LEADERBOARD_MIN as i64, LEADERBOARD_MAX as i64) as usize
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{rank::sample_config, store::MemoryStore};

    pub(crate) struct ManualClock(StdMutex<DateTime<Utc>>);

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self(StdMutex::new(
                Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            ))
        }

        pub(crate) fn advance(&self, d: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += d;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    pub(crate) fn tracker_with(
        data: StoreData,
    ) -> (AfkTracker, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new(data));
        let clock = Arc::new(ManualClock::new());
        let tracker = AfkTracker::open(
            store.clone(),
            Arc::new(RankConfigSource::fixed(sample_config())),
            clock.clone(),
        )
        .unwrap();
        (tracker, store, clock)
    }

    pub(crate) fn author(id: i64, name: &str) -> Author {
        Author::new(UserId(id), name)
    }

    fn with_exp(pairs: &[(i64, u64)]) -> StoreData {
        let mut data = StoreData::default();
        for &(id, exp) in pairs {
            let mut rec = UserRecord::new(UserId(id), format!("user{id}"));
            rec.exp = exp;
            data.users.insert(UserId(id), rec);
        }
        data
    }

    #[tokio::test]
    async fn afk_then_return_awards_elapsed_minutes() {
        let (tracker, store, clock) = tracker_with(StoreData::default());
        let u = UserId(1);

        let started = tracker.set_afk(&author(1, "ann"), Some("  lunch  ")).await.unwrap();
        assert_eq!(started.message.as_deref(), Some("lunch"));
        assert_eq!(started.session_count, 1);
        assert!(store.snapshot().users[&u].is_afk());

        clock.advance(Duration::seconds(45 * 60 + 30));
        let Activity::Returned(out) = tracker.on_activity(&author(1, "ann")).await.activity else {
            panic!("expected a return");
        };
        assert_eq!(out.reward, 45);
        assert_eq!(out.total_exp, 45);
        assert_eq!(out.elapsed_seconds, 45 * 60 + 30);
        assert_eq!(out.message.as_deref(), Some("lunch"));
        assert_eq!(out.rank.name, "Newbie");
        assert_eq!(out.next_rank.map(|t| t.name), Some("Regular".to_string()));

        let rec = &store.snapshot().users[&u];
        assert_eq!(rec.exp, 45);
        assert_eq!(rec.total_afk_seconds, 45 * 60 + 30);
        assert!(!rec.is_afk());
        assert_eq!(rec.session.started_at, None);
        assert_eq!(rec.session.message, None);
        assert_eq!(rec.session.ended_at, Some(clock.now()));
    }

    #[tokio::test]
    async fn long_sessions_hit_the_cap() {
        let (tracker, _, clock) = tracker_with(StoreData::default());
        tracker.set_afk(&author(1, "ann"), None).await.unwrap();
        clock.advance(Duration::hours(5));
        let Activity::Returned(out) = tracker.on_activity(&author(1, "ann")).await.activity else {
            panic!("expected a return");
        };
        assert_eq!(out.reward, 100);
        assert_eq!(out.elapsed_seconds, 5 * 3600);
    }

    #[tokio::test]
    async fn activity_while_active_awards_nothing() {
        let (tracker, store, clock) = tracker_with(with_exp(&[(1, 40)]));
        clock.advance(Duration::hours(3));

        let act = tracker.on_activity(&author(1, "renamed")).await.activity;
        assert_eq!(act, Activity::Idle);

        let rec = &store.snapshot().users[&UserId(1)];
        assert_eq!(rec.exp, 40);
        assert_eq!(rec.total_afk_seconds, 0);
        assert_eq!(rec.display_name, "renamed");
    }

    #[tokio::test]
    async fn first_activity_creates_record() {
        let (tracker, store, _) = tracker_with(StoreData::default());
        tracker.on_activity(&author(9, "newcomer")).await.persisted.unwrap();
        let rec = &store.snapshot().users[&UserId(9)];
        assert_eq!(rec.display_name, "newcomer");
        assert_eq!(rec.exp, 0);
    }

    #[tokio::test]
    async fn setting_afk_twice_is_rejected_and_keeps_the_clock() {
        let (tracker, _, clock) = tracker_with(StoreData::default());
        let first = tracker.set_afk(&author(1, "ann"), Some("a")).await.unwrap();
        clock.advance(Duration::minutes(10));

        let err = tracker.set_afk(&author(1, "ann"), Some("b")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyAfk { since } if since == first.started_at));

        let notice = tracker.afk_notice(UserId(1)).await.unwrap();
        assert_eq!(notice.message.as_deref(), Some("a"));
        assert_eq!(notice.elapsed_seconds, 600);
    }

    #[tokio::test]
    async fn clock_skew_never_yields_negative_time() {
        let (tracker, _, clock) = tracker_with(StoreData::default());
        tracker.set_afk(&author(1, "ann"), None).await.unwrap();
        clock.advance(Duration::minutes(-30));
        let Activity::Returned(out) = tracker.on_activity(&author(1, "ann")).await.activity else {
            panic!("expected a return");
        };
        assert_eq!(out.elapsed_seconds, 0);
        assert_eq!(out.reward, 0);
    }

    #[tokio::test]
    async fn concurrent_activity_awards_once() {
        let (tracker, store, clock) = tracker_with(StoreData::default());
        let tracker = Arc::new(tracker);
        tracker.set_afk(&author(1, "ann"), None).await.unwrap();
        clock.advance(Duration::minutes(20));

        let (author_a, author_b) = (author(1, "ann"), author(1, "ann"));
        let (a, b) = tokio::join!(
            tracker.on_activity(&author_a),
            tracker.on_activity(&author_b),
        );
        let returned = [a.activity, b.activity]
            .into_iter()
            .filter(|act| matches!(act, Activity::Returned(_)))
            .count();
        assert_eq!(returned, 1);
        assert_eq!(store.snapshot().users[&UserId(1)].exp, 20);
    }

    #[tokio::test]
    async fn write_failure_is_reported_but_state_is_kept() {
        let (tracker, store, clock) = tracker_with(StoreData::default());
        tracker.set_afk(&author(1, "ann"), None).await.unwrap();
        clock.advance(Duration::minutes(15));

        store.set_fail_writes(true);
        let result = tracker.on_activity(&author(1, "ann")).await;
        assert!(matches!(result.persisted, Err(Error::StoreWriteFailed { .. })));
        let Activity::Returned(out) = result.activity else {
            panic!("the award must survive the failed write");
        };
        assert_eq!(out.reward, 15);
        assert_eq!(tracker.status_of(UserId(1)).await.record.exp, 15);
        assert!(store.snapshot().users[&UserId(1)].is_afk());

        store.set_fail_writes(false);
        tracker.on_activity(&author(2, "bob")).await.persisted.unwrap();
        assert_eq!(store.snapshot().users[&UserId(1)].exp, 15);
    }

    #[tokio::test]
    async fn status_of_unseen_user_is_not_persisted() {
        let (tracker, store, _) = tracker_with(StoreData::default());
        let status = tracker.status_of(UserId(77)).await;
        assert_eq!(status.record.exp, 0);
        assert_eq!(status.rank.name, "Newbie");
        assert_eq!(status.exp_to_next, Some(100));
        assert!(store.snapshot().users.is_empty());
    }

    #[tokio::test]
    async fn leaderboard_orders_by_exp_then_id() {
        let (tracker, _, _) = tracker_with(with_exp(&[(30, 10), (20, 500), (10, 500)]));
        let board = tracker.leaderboard(3).await;
        let ids: Vec<i64> = board.rows.iter().map(|r| r.record.user_id.0).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(board.rows[0].position, 1);
        assert_eq!(board.rows[0].rank.name, "Active");
        assert_eq!(board.total_users, 3);
    }

    #[tokio::test]
    async fn leaderboard_limit_is_clamped() {
        let pairs: Vec<(i64, u64)> = (1..=30).map(|i| (i, i as u64)).collect();
        let (tracker, _, _) = tracker_with(with_exp(&pairs));
        assert_eq!(tracker.leaderboard(2).await.rows.len(), 2);
        assert_eq!(tracker.leaderboard(-4).await.rows.len(), 1);
        assert_eq!(tracker.leaderboard(500).await.rows.len(), LEADERBOARD_MAX);
        assert_eq!(tracker.leaderboard(500).await.rows[0].record.exp, 30);
    }

    #[tokio::test]
    async fn away_session_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("afk.json");
        let ranks = Arc::new(RankConfigSource::fixed(sample_config()));
        let clock = Arc::new(ManualClock::new());

        let tracker = AfkTracker::open(
            Arc::new(crate::store::JsonFileStore::new(&path)),
            ranks.clone(),
            clock.clone(),
        )
        .unwrap();
        tracker.set_afk(&author(4, "dee"), Some("nap")).await.unwrap();
        drop(tracker);

        clock.advance(Duration::minutes(90));
        let reopened = AfkTracker::open(
            Arc::new(crate::store::JsonFileStore::new(&path)),
            ranks,
            clock,
        )
        .unwrap();
        let Activity::Returned(out) = reopened.on_activity(&author(4, "dee")).await.activity else {
            panic!("expected a return");
        };
        assert_eq!(out.reward, 90);
        assert_eq!(out.message.as_deref(), Some("nap"));
    }

    #[tokio::test]
    async fn leaderboard_skips_users_who_never_went_afk() {
        let mut data = with_exp(&[(1, 0), (2, 0), (3, 50)]);
        data.users.get_mut(&UserId(2)).unwrap().afk_session_count = 1;
        let (tracker, _, _) = tracker_with(data);
        tracker.on_activity(&author(4, "lurker")).await.persisted.unwrap();

        let board = tracker.leaderboard(10).await;
        let ids: Vec<i64> = board.rows.iter().map(|r| r.record.user_id.0).collect();
        assert_eq!(ids, vec![3, 2]);
        assert_eq!(board.total_users, 2);
    }

    #[tokio::test]
    async fn usernames_are_remembered_and_resolved() {
        let (tracker, store, _) = tracker_with(StoreData::default());
        tracker
            .on_activity(&author(1, "ann").with_username("Ann_Sky"))
            .await
            .persisted
            .unwrap();
        tracker
            .set_afk(&author(2, "bob").with_username("bobby"), None)
            .await
            .unwrap();

        assert_eq!(
            store.snapshot().users[&UserId(1)].username.as_deref(),
            Some("Ann_Sky")
        );
        assert_eq!(tracker.user_by_username("@ann_sky").await, Some(UserId(1)));
        assert_eq!(tracker.user_by_username("BOBBY").await, Some(UserId(2)));
        assert_eq!(tracker.user_by_username("@nobody").await, None);
        assert_eq!(tracker.user_by_username("@").await, None);

        // The name moved to another account.
        tracker
            .on_activity(&author(3, "cal").with_username("bobby"))
            .await
            .persisted
            .unwrap();
        assert_eq!(tracker.user_by_username("bobby").await, Some(UserId(3)));
        assert_eq!(store.snapshot().users[&UserId(2)].username, None);
    }

    #[test]
    fn messages_are_trimmed_and_capped() {
        assert_eq!(normalize_message(None), None);
        assert_eq!(normalize_message(Some("   ")), None);
        let long = "x".repeat(MAX_AFK_MESSAGE_CHARS + 20);
        assert_eq!(
            normalize_message(Some(&long)).unwrap().chars().count(),
            MAX_AFK_MESSAGE_CHARS
        );
    }
}
