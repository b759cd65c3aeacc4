//! Index list/map consistency and rebuild atomicity under concurrent reads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use agent_catalog_core::{AgentIndex, AgentRecord};

fn generation(prefix: &str, count: usize) -> Vec<AgentRecord> {
    (0..count)
        .map(|i| AgentRecord::new(format!("{prefix}-{i}"), format!("{prefix}-{i}.md")))
        .collect()
}

fn assert_consistent(index: &AgentIndex) {
    let all = index.get_all();
    for record in &all {
        let found = index
            .get_by_file_identifier(&record.file_identifier)
            .expect("listed record must be reachable by identifier");
        assert_eq!(&found, record);
    }
    let stats = index.stats();
    assert_eq!(stats.records, all.len());
    assert_eq!(stats.by_file_identifier, all.len());
}

#[test]
fn test_consistent_across_add_and_rebuild_sequences() {
    let index = AgentIndex::new();
    assert_consistent(&index);

    index.add_record(AgentRecord::new("alpha", "alpha.md"));
    index.add_record(AgentRecord::new("beta", "beta.md"));
    assert_consistent(&index);

    // Same identifier: last write wins, no duplicate.
    index.add_record(AgentRecord::new("alpha-v2", "alpha.md").with_description("second"));
    assert_consistent(&index);
    assert_eq!(index.len(), 2);
    assert_eq!(
        index.get_by_file_identifier("alpha.md").unwrap().description,
        "second"
    );

    index.rebuild(generation("gen", 5));
    assert_consistent(&index);
    assert!(index.get_by_file_identifier("beta.md").is_none());

    index.add_record(AgentRecord::new("late", "late.md"));
    index.rebuild(vec![
        AgentRecord::new("dup", "dup.md"),
        AgentRecord::new("dup-again", "dup.md"),
    ]);
    assert_consistent(&index);
    assert_eq!(index.len(), 1);
    assert_eq!(index.get_by_file_identifier("dup.md").unwrap().name, "dup-again");
}

#[test]
fn test_readers_never_observe_partial_rebuild() {
    let old = generation("old", 10);
    let new = generation("new", 25);
    let index = Arc::new(AgentIndex::from_records(old.clone()));
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let index = Arc::clone(&index);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let mut observed = 0usize;
                while !done.load(Ordering::Relaxed) {
                    let all = index.get_all();
                    let prefix = all
                        .first()
                        .map(|r| r.name.split('-').next().unwrap_or_default().to_string());
                    match prefix.as_deref() {
                        Some("old") => assert_eq!(all.len(), 10),
                        Some("new") => assert_eq!(all.len(), 25),
                        other => panic!("unexpected state: {other:?}"),
                    }
                    let first = prefix.unwrap_or_default();
                    assert!(all.iter().all(|r| r.name.starts_with(&first)));
                    observed += 1;
                }
                observed
            })
        })
        .collect();

    for round in 0..200 {
        let next = if round % 2 == 0 { new.clone() } else { old.clone() };
        index.rebuild(next);
    }
    done.store(true, Ordering::Relaxed);

    for reader in readers {
        reader.join().expect("reader panicked");
    }
    assert_consistent(&index);
}
