//! The refresh-entity diff algorithm (§4.6): compares the engine's current
//! view of an entity against the mart's, and produces the set of writes and
//! report deltas that reconcile the two.
//!
//! Deliberately pure — no I/O here. [`crate::refresh`] does the fetching and
//! writing; this module only knows how to compare two snapshots.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use dm_store::mart_view::MartEntityRow;
use dm_types::{entity_view_hash, EntityId, EntityView, RecordKey, RelationView, ReportKey};

/// Which of the four cases in §4.6 step 1 this refresh fell into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshCase {
    /// The engine resolves the entity but the mart has never seen it.
    New,
    /// Both sides know the entity and its content hash differs.
    Updated,
    /// Both sides know the entity and the content hash matches — a no-op.
    Unchanged,
    /// The mart has the entity but the engine no longer resolves it.
    Deleted,
    /// Neither side knows the entity; nothing to do.
    Absent,
}

/// One additive change to a report statistic, staged for the pending-delta
/// ledger rather than applied directly — report handlers own aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportDelta {
    pub report_key: ReportKey,
    pub entity_id: Option<EntityId>,
    pub related_id: Option<EntityId>,
    pub entity_delta: i64,
    pub record_delta: i64,
    pub relation_delta: i64,
}

/// Everything the refresh-entity handler needs to write to reconcile one
/// entity, plus the entity ids whose own refresh should be re-triggered as a
/// consequence (the other endpoint of every relation that changed).
#[derive(Debug, Clone, Default)]
pub struct RefreshPlan {
    pub case: RefreshCase,
    pub entity_write: Option<MartEntityRow>,
    pub delete_entity: bool,
    pub record_upserts: Vec<RecordKey>,
    pub record_deletes: Vec<RecordKey>,
    pub relation_upserts: Vec<RelationView>,
    pub relation_deletes: Vec<EntityId>,
    pub report_deltas: Vec<ReportDelta>,
    pub follow_up_entities: BTreeSet<EntityId>,
}

impl Default for RefreshCase {
    fn default() -> Self {
        Self::Absent
    }
}

/// Current mart-side state for one entity, as read at the start of a
/// refresh.
pub struct MartSnapshot<'a> {
    pub row: Option<&'a MartEntityRow>,
    pub records: &'a [RecordKey],
    pub relations: &'a [RelationView],
}

/// Computes the write plan for refreshing `entity_id`.
///
/// `other_entity_sources` gives the current data-source membership of every
/// related entity that is a candidate for a cross-source relation delta
/// (§4.6's relation-count bookkeeping, attributed once per relation from its
/// canonical — lower-id — endpoint to avoid double counting when both
/// endpoints are eventually refreshed).
#[must_use]
pub fn compute_refresh_plan(
    entity_id: EntityId,
    engine_view: Option<&EntityView>,
    mart: &MartSnapshot<'_>,
    other_entity_sources: &HashMap<EntityId, Vec<String>>,
) -> RefreshPlan {
    let mut plan = RefreshPlan::default();

    match (engine_view, mart.row) {
        (None, None) => {
            plan.case = RefreshCase::Absent;
            plan
        }
        (None, Some(row)) => {
            plan.case = RefreshCase::Deleted;
            build_deletion(entity_id, row, mart, &mut plan);
            plan
        }
        (Some(view), existing_row) => {
            let new_hash = entity_view_hash(view).to_string();
            if let Some(row) = existing_row {
                if row.entity_hash == new_hash {
                    plan.case = RefreshCase::Unchanged;
                    return plan;
                }
                plan.case = RefreshCase::Updated;
            } else {
                plan.case = RefreshCase::New;
            }
            build_upsert(entity_id, view, &new_hash, mart, other_entity_sources, &mut plan);
            plan
        }
    }
}

fn build_deletion(entity_id: EntityId, row: &MartEntityRow, mart: &MartSnapshot<'_>, plan: &mut RefreshPlan) {
    plan.delete_entity = true;
    plan.record_deletes.extend(mart.records.iter().cloned());
    for relation in mart.relations {
        plan.relation_deletes.push(relation.related_id);
        plan.follow_up_entities.insert(relation.related_id);
    }

    let old_sources = source_counts(mart.records);
    for (source, count) in &old_sources {
        plan.report_deltas.push(ReportDelta {
            report_key: ReportKey::data_source_summary(source.clone()),
            entity_id: Some(entity_id),
            related_id: None,
            entity_delta: -1,
            record_delta: -count,
            relation_delta: 0,
        });
    }
    plan.report_deltas.extend(cross_source_deltas(entity_id, &old_sources, &BTreeMap::new()));

    plan.report_deltas.push(breakdown_bucket_delta(ReportKey::entity_size_breakdown, entity_id, row.record_count, -1));
    plan.report_deltas.push(breakdown_bucket_delta(ReportKey::entity_relation_breakdown, entity_id, row.related_count, -1));
}

fn build_upsert(
    entity_id: EntityId,
    view: &EntityView,
    new_hash: &str,
    mart: &MartSnapshot<'_>,
    other_entity_sources: &HashMap<EntityId, Vec<String>>,
    plan: &mut RefreshPlan,
) {
    let canonical = view.clone().canonicalized();
    let new_records: BTreeSet<RecordKey> = canonical.members.iter().cloned().collect();
    let old_records: BTreeSet<RecordKey> = mart.records.iter().cloned().collect();

    for added in new_records.difference(&old_records) {
        plan.record_upserts.push(added.clone());
    }
    for removed in old_records.difference(&new_records) {
        plan.record_deletes.push(removed.clone());
    }

    let old_relations: HashMap<EntityId, &RelationView> =
        mart.relations.iter().map(|relation| (relation.related_id, relation)).collect();
    let new_relations: HashMap<EntityId, &RelationView> =
        canonical.relations.iter().map(|relation| (relation.related_id, relation)).collect();

    for (related_id, relation) in &new_relations {
        match old_relations.get(related_id) {
            None => {
                plan.relation_upserts.push((*relation).clone());
                plan.follow_up_entities.insert(*related_id);
                if entity_id < *related_id {
                    if let Some(other_sources) = other_entity_sources.get(related_id) {
                        plan.report_deltas.extend(relation_bridge_deltas(
                            entity_id,
                            *related_id,
                            &canonical.data_sources(),
                            other_sources,
                            1,
                        ));
                    }
                }
            }
            Some(old) => {
                if old != relation {
                    plan.relation_upserts.push((*relation).clone());
                    plan.follow_up_entities.insert(*related_id);
                }
            }
        }
    }
    for (related_id, _) in old_relations.iter().filter(|(id, _)| !new_relations.contains_key(*id)) {
        plan.relation_deletes.push(*related_id);
        plan.follow_up_entities.insert(*related_id);
        if entity_id < *related_id {
            if let Some(other_sources) = other_entity_sources.get(related_id) {
                let old_sources = source_counts(mart.records);
                let old_source_names: Vec<&str> = old_sources.keys().map(String::as_str).collect();
                plan.report_deltas.extend(relation_bridge_deltas(entity_id, *related_id, &old_source_names, other_sources, -1));
            }
        }
    }

    let old_sources = source_counts(mart.records);
    let new_sources = source_counts(&canonical.members);
    plan.report_deltas.extend(data_source_summary_deltas(entity_id, &old_sources, &new_sources));
    plan.report_deltas.extend(cross_source_deltas(entity_id, &old_sources, &new_sources));

    let old_size = mart.row.map(|row| row.record_count);
    let new_size = i64::try_from(canonical.members.len()).unwrap_or(i64::MAX);
    if old_size != Some(new_size) {
        if let Some(old_size) = old_size {
            plan.report_deltas.push(breakdown_bucket_delta(ReportKey::entity_size_breakdown, entity_id, old_size, -1));
        }
        plan.report_deltas.push(breakdown_bucket_delta(ReportKey::entity_size_breakdown, entity_id, new_size, 1));
    }

    let old_related = mart.row.map(|row| row.related_count);
    let new_related = i64::try_from(canonical.relations.len()).unwrap_or(i64::MAX);
    if old_related != Some(new_related) {
        if let Some(old_related) = old_related {
            plan.report_deltas.push(breakdown_bucket_delta(ReportKey::entity_relation_breakdown, entity_id, old_related, -1));
        }
        plan.report_deltas.push(breakdown_bucket_delta(ReportKey::entity_relation_breakdown, entity_id, new_related, 1));
    }

    plan.entity_write = Some(MartEntityRow {
        entity_id,
        entity_name: canonical.entity_name.clone(),
        record_summary: canonical.record_summary.clone(),
        record_count: new_size,
        related_count: new_related,
        entity_hash: new_hash.to_owned(),
    });
}

/// Counts records by data source, as an ordered map so iteration order (and
/// therefore report-key generation order) is deterministic.
fn source_counts(records: &[RecordKey]) -> BTreeMap<String, i64> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.data_source.clone()).or_insert(0_i64) += 1;
    }
    counts
}

fn data_source_summary_deltas(entity_id: EntityId, old: &BTreeMap<String, i64>, new: &BTreeMap<String, i64>) -> Vec<ReportDelta> {
    let mut deltas = Vec::new();
    let sources: BTreeSet<&String> = old.keys().chain(new.keys()).collect();
    for source in sources {
        let old_count = old.get(source).copied().unwrap_or(0);
        let new_count = new.get(source).copied().unwrap_or(0);
        let entity_delta = i64::from(new_count > 0) - i64::from(old_count > 0);
        let record_delta = new_count - old_count;
        if entity_delta != 0 || record_delta != 0 {
            deltas.push(ReportDelta {
                report_key: ReportKey::data_source_summary(source.clone()),
                entity_id: Some(entity_id),
                related_id: None,
                entity_delta,
                record_delta,
                relation_delta: 0,
            });
        }
    }
    deltas
}

/// Same-source pairs qualify once an entity holds at least two records from
/// that source; cross-source pairs qualify once it holds at least one from
/// each side.
fn cross_source_deltas(entity_id: EntityId, old: &BTreeMap<String, i64>, new: &BTreeMap<String, i64>) -> Vec<ReportDelta> {
    let mut deltas = Vec::new();
    let sources: Vec<&String> = old.keys().chain(new.keys()).collect::<BTreeSet<_>>().into_iter().collect();

    for (i, a) in sources.iter().enumerate() {
        for b in &sources[i..] {
            let (a, b) = (a.as_str(), b.as_str());
            let (old_qualifies, old_records) = pair_qualifies(old, a, b);
            let (new_qualifies, new_records) = pair_qualifies(new, a, b);
            let entity_delta = i64::from(new_qualifies) - i64::from(old_qualifies);
            let record_delta = new_records - old_records;
            if entity_delta != 0 || record_delta != 0 {
                deltas.push(ReportDelta {
                    report_key: ReportKey::cross_source_summary(a.to_owned(), b.to_owned()),
                    entity_id: Some(entity_id),
                    related_id: None,
                    entity_delta,
                    record_delta,
                    relation_delta: 0,
                });
            }
        }
    }
    deltas
}

fn pair_qualifies(counts: &BTreeMap<String, i64>, a: &str, b: &str) -> (bool, i64) {
    if a == b {
        let count = counts.get(a).copied().unwrap_or(0);
        (count >= 2, if count >= 2 { count } else { 0 })
    } else {
        let count_a = counts.get(a).copied().unwrap_or(0);
        let count_b = counts.get(b).copied().unwrap_or(0);
        let qualifies = count_a > 0 && count_b > 0;
        (qualifies, if qualifies { count_a + count_b } else { 0 })
    }
}

/// Every cross-source pair bridged by a relation between `entity_id` (whose
/// current data sources are `my_sources`) and `related_id` (`other_sources`)
/// gets `sign` applied to its relation count.
fn relation_bridge_deltas(entity_id: EntityId, related_id: EntityId, my_sources: &[&str], other_sources: &[String], sign: i64) -> Vec<ReportDelta> {
    let mut deltas = Vec::new();
    for mine in my_sources {
        for theirs in other_sources {
            deltas.push(ReportDelta {
                report_key: ReportKey::cross_source_summary((*mine).to_owned(), theirs.clone()),
                entity_id: Some(entity_id),
                related_id: Some(related_id),
                entity_delta: 0,
                record_delta: 0,
                relation_delta: sign,
            });
        }
    }
    deltas
}

fn breakdown_bucket_delta(key_for_bucket: fn(u32) -> ReportKey, entity_id: EntityId, bucket: i64, entity_delta: i64) -> ReportDelta {
    ReportDelta {
        report_key: key_for_bucket(u32::try_from(bucket).unwrap_or(u32::MAX)),
        entity_id: Some(entity_id),
        related_id: None,
        entity_delta,
        record_delta: 0,
        relation_delta: 0,
    }
}
