use std::{collections::HashSet, sync::Arc, time::Duration};

use dashmap::{DashMap, mapref::entry::Entry};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::{sync::Mutex, time::Instant};
use uuid::Uuid;

use super::{
    ActivePoll, ClosedPoll, SessionCache, Student, StudentUpdate, Tally, TeacherClaim,
    VoteOutcome, name_key,
};
use crate::dao::storage::StorageResult;

/// Single-process session cache.
///
/// The poll pointer, its tally and its voter set share one lock so votes and closes
/// never interleave. Roster names are reserved through a separate index so a name
/// can only be claimed once.
#[derive(Clone)]
pub struct MemorySessionCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    ttl: Duration,
    poll: Mutex<Option<PollSlot>>,
    students: DashMap<Uuid, Student>,
    names: DashMap<String, Uuid>,
    teacher: Mutex<Option<Expiring<TeacherClaim>>>,
}

struct PollSlot {
    poll: ActivePoll,
    counts: IndexMap<String, u64>,
    voters: HashSet<String>,
    expires_at: Instant,
}

impl PollSlot {
    fn tally(&self) -> Tally {
        Tally {
            counts: self.counts.clone(),
            voters: self.voters.len() as u64,
        }
    }
}

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

/// Drop the slot when its ttl has passed, then hand back what is left.
fn live<T>(slot: &mut Option<T>, expires_at: impl Fn(&T) -> Instant) -> Option<&mut T> {
    if slot
        .as_ref()
        .is_some_and(|value| expires_at(value) <= Instant::now())
    {
        slot.take();
    }
    slot.as_mut()
}

impl MemorySessionCache {
    /// Empty cache whose poll and teacher entries expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl,
                poll: Mutex::new(None),
                students: DashMap::new(),
                names: DashMap::new(),
                teacher: Mutex::new(None),
            }),
        }
    }
}

impl SessionCache for MemorySessionCache {
    fn open_poll(&self, poll: ActivePoll) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut slot = inner.poll.lock().await;
            if live(&mut *slot, |slot| slot.expires_at).is_some() {
                return Ok(false);
            }
            *slot = Some(PollSlot {
                counts: Tally::seeded(&poll.options).counts,
                poll,
                voters: HashSet::new(),
                expires_at: Instant::now() + inner.ttl,
            });
            Ok(true)
        })
    }

    fn active_poll(&self) -> BoxFuture<'static, StorageResult<Option<ActivePoll>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut slot = inner.poll.lock().await;
            Ok(live(&mut *slot, |slot| slot.expires_at).map(|slot| slot.poll.clone()))
        })
    }

    fn take_poll(&self, poll_id: Uuid) -> BoxFuture<'static, StorageResult<Option<ClosedPoll>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut slot = inner.poll.lock().await;
            let matches = live(&mut *slot, |slot| slot.expires_at)
                .is_some_and(|slot| slot.poll.id == poll_id);
            if !matches {
                return Ok(None);
            }
            Ok(slot.take().map(|slot| ClosedPoll {
                tally: slot.tally(),
                poll: slot.poll,
            }))
        })
    }

    fn record_vote(
        &self,
        poll_id: Uuid,
        voter_name: String,
        option: String,
    ) -> BoxFuture<'static, StorageResult<VoteOutcome>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut guard = inner.poll.lock().await;
            let Some(slot) = live(&mut *guard, |slot| slot.expires_at)
                .filter(|slot| slot.poll.id == poll_id)
            else {
                return Ok(VoteOutcome::NoActivePoll);
            };
            let Some(count) = slot.counts.get_mut(&option) else {
                return Ok(VoteOutcome::InvalidOption);
            };
            if !slot.voters.insert(name_key(&voter_name)) {
                return Ok(VoteOutcome::AlreadyVoted);
            }
            *count += 1;
            slot.expires_at = Instant::now() + inner.ttl;
            Ok(VoteOutcome::Recorded(slot.tally()))
        })
    }

    fn tally(&self, poll_id: Uuid) -> BoxFuture<'static, StorageResult<Option<Tally>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut slot = inner.poll.lock().await;
            Ok(live(&mut *slot, |slot| slot.expires_at)
                .filter(|slot| slot.poll.id == poll_id)
                .map(|slot| slot.tally()))
        })
    }

    fn has_voted(
        &self,
        poll_id: Uuid,
        voter_name: String,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut slot = inner.poll.lock().await;
            Ok(live(&mut *slot, |slot| slot.expires_at)
                .filter(|slot| slot.poll.id == poll_id)
                .is_some_and(|slot| slot.voters.contains(&name_key(&voter_name))))
        })
    }

    fn insert_student(&self, student: Student) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            match inner.names.entry(name_key(&student.name)) {
                Entry::Occupied(_) => Ok(false),
                Entry::Vacant(slot) => {
                    slot.insert(student.connection_id);
                    inner.students.insert(student.connection_id, student);
                    Ok(true)
                }
            }
        })
    }

    fn remove_student(
        &self,
        connection_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Student>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let removed = inner.students.remove(&connection_id).map(|(_, student)| student);
            if let Some(student) = &removed {
                inner
                    .names
                    .remove_if(&name_key(&student.name), |_, owner| *owner == connection_id);
            }
            Ok(removed)
        })
    }

    fn student(&self, connection_id: Uuid) -> BoxFuture<'static, StorageResult<Option<Student>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner
                .students
                .get(&connection_id)
                .map(|student| student.clone()))
        })
    }

    fn student_by_name(
        &self,
        name: String,
    ) -> BoxFuture<'static, StorageResult<Option<Student>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let owner = inner.names.get(&name_key(&name)).map(|owner| *owner);
            Ok(owner.and_then(|id| inner.students.get(&id).map(|student| student.clone())))
        })
    }

    fn students(&self) -> BoxFuture<'static, StorageResult<Vec<Student>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut roster: Vec<Student> = inner
                .students
                .iter()
                .map(|entry| entry.value().clone())
                .collect();
            roster.sort_by(|a, b| {
                a.joined_at
                    .cmp(&b.joined_at)
                    .then_with(|| a.name.cmp(&b.name))
            });
            Ok(roster)
        })
    }

    fn update_student(
        &self,
        connection_id: Uuid,
        update: StudentUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<Student>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            Ok(inner.students.get_mut(&connection_id).map(|mut student| {
                match update {
                    StudentUpdate::Touch(at) => student.last_seen = at,
                    StudentUpdate::MarkVoted(at) => {
                        student.has_voted = true;
                        student.voted_at = Some(at);
                        student.last_seen = at;
                    }
                }
                student.clone()
            }))
        })
    }

    fn reset_votes(&self) -> BoxFuture<'static, StorageResult<usize>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut reset = 0;
            for mut student in inner.students.iter_mut() {
                if student.has_voted {
                    student.has_voted = false;
                    student.voted_at = None;
                    reset += 1;
                }
            }
            Ok(reset)
        })
    }

    fn set_teacher(
        &self,
        claim: TeacherClaim,
    ) -> BoxFuture<'static, StorageResult<Option<TeacherClaim>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut slot = inner.teacher.lock().await;
            live(&mut *slot, |claim| claim.expires_at);
            let previous = slot.replace(Expiring {
                value: claim,
                expires_at: Instant::now() + inner.ttl,
            });
            Ok(previous.map(|claim| claim.value))
        })
    }

    fn teacher(&self) -> BoxFuture<'static, StorageResult<Option<TeacherClaim>>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut slot = inner.teacher.lock().await;
            Ok(live(&mut *slot, |claim| claim.expires_at).map(|claim| claim.value.clone()))
        })
    }

    fn release_teacher(&self, connection_id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            let mut slot = inner.teacher.lock().await;
            let held = live(&mut *slot, |claim| claim.expires_at)
                .is_some_and(|claim| claim.value.connection_id == connection_id);
            if held {
                slot.take();
            }
            Ok(held)
        })
    }

    fn clear(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move {
            inner.poll.lock().await.take();
            inner.teacher.lock().await.take();
            inner.students.clear();
            inner.names.clear();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn cache() -> MemorySessionCache {
        MemorySessionCache::new(Duration::from_secs(3600))
    }

    fn poll(options: &[&str]) -> ActivePoll {
        ActivePoll {
            id: Uuid::new_v4(),
            question: "Best colour?".into(),
            options: options.iter().map(|option| option.to_string()).collect(),
            duration_secs: 60,
            started_at: SystemTime::now(),
            session_id: "session".into(),
            teacher_connection_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn second_open_is_rejected_while_active() {
        let cache = cache();
        assert!(cache.open_poll(poll(&["A", "B"])).await.unwrap());
        assert!(!cache.open_poll(poll(&["C", "D"])).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_votes_are_all_counted() {
        let cache = cache();
        let active = poll(&["A", "B"]);
        cache.open_poll(active.clone()).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..40 {
            let cache = cache.clone();
            let option = if i % 2 == 0 { "A" } else { "B" };
            handles.push(tokio::spawn(cache.record_vote(
                active.id,
                format!("student{i}"),
                option.to_string(),
            )));
        }
        for handle in handles {
            assert!(matches!(
                handle.await.unwrap().unwrap(),
                VoteOutcome::Recorded(_)
            ));
        }

        let tally = cache.tally(active.id).await.unwrap().unwrap();
        assert_eq!(tally.total_votes(), 40);
        assert_eq!(tally.voters, 40);
        assert_eq!(tally.counts["A"], 20);
    }

    #[tokio::test]
    async fn vote_outcomes_cover_each_rejection() {
        let cache = cache();
        let active = poll(&["A", "B"]);
        cache.open_poll(active.clone()).await.unwrap();

        let outcome = cache
            .record_vote(Uuid::new_v4(), "Alice".into(), "A".into())
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::NoActivePoll);

        let outcome = cache
            .record_vote(active.id, "Alice".into(), "Z".into())
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::InvalidOption);

        let outcome = cache
            .record_vote(active.id, "Alice".into(), "A".into())
            .await
            .unwrap();
        assert!(matches!(outcome, VoteOutcome::Recorded(ref tally) if tally.counts["A"] == 1));

        let outcome = cache
            .record_vote(active.id, "ALICE".into(), "B".into())
            .await
            .unwrap();
        assert_eq!(outcome, VoteOutcome::AlreadyVoted);
        assert!(cache.has_voted(active.id, "alice".into()).await.unwrap());
    }

    #[tokio::test]
    async fn take_poll_has_a_single_winner() {
        let cache = cache();
        let active = poll(&["A", "B"]);
        cache.open_poll(active.clone()).await.unwrap();
        cache
            .record_vote(active.id, "Alice".into(), "B".into())
            .await
            .unwrap();

        let first = cache.take_poll(active.id).await.unwrap().unwrap();
        assert_eq!(first.tally.counts["B"], 1);
        assert!(cache.take_poll(active.id).await.unwrap().is_none());
        assert!(cache.active_poll().await.unwrap().is_none());
        assert!(cache.tally(active.id).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_pointer_expires_after_ttl() {
        let cache = MemorySessionCache::new(Duration::from_secs(10));
        cache.open_poll(poll(&["A", "B"])).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(cache.active_poll().await.unwrap().is_none());
        assert!(cache.open_poll(poll(&["C", "D"])).await.unwrap());
    }

    #[tokio::test]
    async fn names_are_unique_case_insensitively_until_released() {
        let cache = cache();
        let now = SystemTime::now();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(
            cache
                .insert_student(Student::new(first, "Alice".into(), now))
                .await
                .unwrap()
        );
        assert!(
            !cache
                .insert_student(Student::new(second, "alice".into(), now))
                .await
                .unwrap()
        );

        cache.remove_student(first).await.unwrap();
        assert!(
            cache
                .insert_student(Student::new(second, "alice".into(), now))
                .await
                .unwrap()
        );
        let owner = cache.student_by_name("ALICE".into()).await.unwrap().unwrap();
        assert_eq!(owner.connection_id, second);
    }

    #[tokio::test]
    async fn reset_votes_clears_flags() {
        let cache = cache();
        let now = SystemTime::now();
        let id = Uuid::new_v4();
        cache
            .insert_student(Student::new(id, "Bob".into(), now))
            .await
            .unwrap();
        cache
            .update_student(id, StudentUpdate::MarkVoted(now))
            .await
            .unwrap();

        assert_eq!(cache.reset_votes().await.unwrap(), 1);
        let student = cache.student(id).await.unwrap().unwrap();
        assert!(!student.has_voted);
        assert!(student.voted_at.is_none());
    }

    #[tokio::test]
    async fn teacher_claim_is_released_only_by_its_holder() {
        let cache = cache();
        let holder = Uuid::new_v4();
        let claim = TeacherClaim {
            connection_id: holder,
            session_id: "s".into(),
            joined_at: SystemTime::now(),
        };
        assert!(cache.set_teacher(claim.clone()).await.unwrap().is_none());

        assert!(!cache.release_teacher(Uuid::new_v4()).await.unwrap());
        assert!(cache.release_teacher(holder).await.unwrap());
        assert!(cache.teacher().await.unwrap().is_none());
    }
}
