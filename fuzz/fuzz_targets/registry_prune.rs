#![no_main]

use libfuzzer_sys::fuzz_target;

use git_pulsar::registry::Registry;

// Prune may only remove entries whose path is proved absent or proved not a
// repository. Arbitrary registry contents — whitespace paths, odd unicode,
// unreadable metadata — must never widen that set, and neither decode nor
// prune may panic.
fuzz_target!(|data: &[u8]| {
    let Ok(mut registry) = serde_json::from_slice::<Registry>(data) else {
        return;
    };

    let removed = registry.prune();

    for (entry, _reason) in &removed {
        let proven = match std::fs::symlink_metadata(&entry.path) {
            Err(e) => e.kind() == std::io::ErrorKind::NotFound,
            Ok(meta) if !meta.is_dir() => true,
            Ok(_) => matches!(
                std::fs::symlink_metadata(entry.path.join(".git")),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound
            ),
        };
        assert!(proven, "pruned without proof: {:?}", entry.path);
    }

    // Survivors must still round-trip.
    let json = serde_json::to_vec(&registry).expect("registry serializes");
    let reparsed: Registry = serde_json::from_slice(&json).expect("registry reparses");
    assert_eq!(reparsed, registry);
});
