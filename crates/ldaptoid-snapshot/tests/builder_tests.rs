//! Snapshot builder invariants.

use std::collections::HashSet;

use ldaptoid_idp::{AdapterOutput, IdpGroup, IdpUser};
use ldaptoid_snapshot::{
    alloc::DEFAULT_ID_FLOOR, build_snapshot, seed_allocators, BuildConfig, Feature, IdAllocator,
    MappingRecord, MappingStore, MemoryMappingStore, SENTINEL_PRIMARY_GROUP_ID,
};

fn user(id: &str, username: &str) -> IdpUser {
    IdpUser {
        id: id.to_string(),
        username: username.to_string(),
        display_name: username.to_string(),
        email: Some(format!("{username}@example.com")),
    }
}

fn group(id: &str, name: &str, members: &[&str]) -> IdpGroup {
    IdpGroup {
        id: id.to_string(),
        name: name.to_string(),
        description: None,
        member_user_ids: members.iter().map(|member| member.to_string()).collect(),
    }
}

fn sample_output() -> AdapterOutput {
    AdapterOutput {
        users: vec![user("u1", "alice"), user("u2", "bob"), user("u3", "carol")],
        groups: vec![
            group("g1", "devs", &["u1", "u2", "ghost"]),
            group("g2", "ops", &["u3"]),
        ],
    }
}

fn allocators() -> (IdAllocator, IdAllocator) {
    (IdAllocator::new("uid"), IdAllocator::new("gid"))
}

#[test]
fn ids_are_unique_and_above_floor() {
    let (mut uid_alloc, mut gid_alloc) = allocators();
    let config = BuildConfig {
        features: vec![Feature::SyntheticPrimaryGroup, Feature::MirrorNestedGroups],
        ..Default::default()
    };
    let (snapshot, _) = build_snapshot(&sample_output(), &mut uid_alloc, &mut gid_alloc, &config, 1);

    let mut uids = HashSet::new();
    for user in snapshot.users() {
        assert!(user.uid_number > DEFAULT_ID_FLOOR);
        assert!(uids.insert(user.uid_number), "duplicate uid {}", user.uid_number);
    }
    let mut gids = HashSet::new();
    for group in snapshot.groups() {
        assert!(gids.insert(group.gid_number), "duplicate gid {}", group.gid_number);
    }
}

#[test]
fn membership_references_resolve_and_are_sorted() {
    let (mut uid_alloc, mut gid_alloc) = allocators();
    let config = BuildConfig {
        features: vec![Feature::SyntheticPrimaryGroup],
        ..Default::default()
    };
    let (snapshot, _) = build_snapshot(&sample_output(), &mut uid_alloc, &mut gid_alloc, &config, 1);

    for user in snapshot.users() {
        assert!(snapshot.group_by_id(&user.primary_group_id).is_some());
        for group_id in &user.member_group_ids {
            assert!(snapshot.group_by_id(group_id).is_some());
        }
    }
    for group in snapshot.groups() {
        let mut sorted = group.member_user_ids.clone();
        sorted.sort();
        assert_eq!(group.member_user_ids, sorted);
        for member in &group.member_user_ids {
            assert!(snapshot.user_by_id(member).is_some());
        }
        for nested in &group.member_group_ids {
            assert!(snapshot.group_by_id(nested).is_some());
        }
    }

    // The phantom member "ghost" was dropped.
    let devs = snapshot.group_by_name("devs").unwrap();
    assert_eq!(devs.member_user_ids, vec!["u1".to_string(), "u2".to_string()]);

    // Supplementary membership is reflected on the user.
    let alice = snapshot.user_by_username("alice").unwrap();
    assert_eq!(alice.member_group_ids, vec!["g1".to_string()]);
}

#[test]
fn synthetic_primary_gives_each_user_one_private_group() {
    let (mut uid_alloc, mut gid_alloc) = allocators();
    let config = BuildConfig {
        features: vec![Feature::SyntheticPrimaryGroup],
        ..Default::default()
    };
    let (snapshot, _) = build_snapshot(&sample_output(), &mut uid_alloc, &mut gid_alloc, &config, 1);

    for user in snapshot.users() {
        let singletons: Vec<_> = snapshot
            .groups()
            .iter()
            .filter(|group| group.is_synthetic)
            .filter(|group| group.member_user_ids == vec![user.id.clone()])
            .collect();
        assert_eq!(singletons.len(), 1, "user {}", user.username);
        assert_eq!(user.primary_group_id, singletons[0].id);
        assert_eq!(snapshot.primary_gid(user), Some(singletons[0].gid_number));
    }
    let alice = snapshot.user_by_username("alice").unwrap();
    let primary = snapshot.group_by_id(&alice.primary_group_id).unwrap();
    assert_eq!(primary.name, "alice-primary");
}

#[test]
fn sentinel_primary_group_when_feature_off() {
    let (mut uid_alloc, mut gid_alloc) = allocators();
    let (snapshot, _) = build_snapshot(
        &sample_output(),
        &mut uid_alloc,
        &mut gid_alloc,
        &BuildConfig::default(),
        1,
    );

    let sentinel = snapshot.group_by_id(SENTINEL_PRIMARY_GROUP_ID).unwrap();
    assert!(sentinel.is_synthetic);
    for user in snapshot.users() {
        assert_eq!(user.primary_group_id, SENTINEL_PRIMARY_GROUP_ID);
        assert_eq!(snapshot.primary_gid(user), Some(sentinel.gid_number));
    }
}

#[test]
fn mirrors_cover_groups_at_or_over_the_member_threshold() {
    let (mut uid_alloc, mut gid_alloc) = allocators();
    let config = BuildConfig {
        features: vec![Feature::SyntheticPrimaryGroup, Feature::MirrorNestedGroups],
        mirror_min_members: 2,
        ..Default::default()
    };
    let (snapshot, _) = build_snapshot(&sample_output(), &mut uid_alloc, &mut gid_alloc, &config, 1);

    // devs has two members and gets a mirror; ops has one and does not.
    let mirror = snapshot.group_by_id("mirror:g1").unwrap();
    assert!(mirror.is_synthetic);
    assert_eq!(mirror.name, "devs-mirror");
    assert!(mirror.member_user_ids.is_empty());
    assert_eq!(
        mirror.member_group_ids,
        vec!["synthetic:u1".to_string(), "synthetic:u2".to_string()]
    );
    assert!(snapshot.group_by_id("mirror:g2").is_none());

    // Mirror members are leaf groups, so the graph cannot cycle.
    for nested in &mirror.member_group_ids {
        let leaf = snapshot.group_by_id(nested).unwrap();
        assert!(leaf.member_group_ids.is_empty());
    }
}

#[test]
fn oversized_group_is_clipped_at_the_cap() {
    let members: Vec<String> = (0..5_001).map(|n| format!("u{n:05}")).collect();
    let output = AdapterOutput {
        users: members
            .iter()
            .map(|id| user(id, &format!("user-{id}")))
            .collect(),
        groups: vec![IdpGroup {
            id: "big".to_string(),
            name: "everyone".to_string(),
            description: None,
            member_user_ids: members,
        }],
    };

    let (mut uid_alloc, mut gid_alloc) = allocators();
    let (snapshot, _) = build_snapshot(
        &output,
        &mut uid_alloc,
        &mut gid_alloc,
        &BuildConfig::default(),
        1,
    );

    let big = snapshot.group_by_id("big").unwrap();
    assert_eq!(big.member_user_ids.len(), 5_000);
    assert!(big.truncated);
}

#[test]
fn duplicate_names_get_collision_suffixes() {
    let output = AdapterOutput {
        users: vec![user("u1", "alice"), user("u2", "alice")],
        groups: vec![group("g1", "devs", &[]), group("g2", "devs", &[])],
    };
    let (mut uid_alloc, mut gid_alloc) = allocators();
    let (snapshot, _) = build_snapshot(
        &output,
        &mut uid_alloc,
        &mut gid_alloc,
        &BuildConfig::default(),
        1,
    );

    let usernames: Vec<_> = snapshot.users().iter().map(|u| u.username.clone()).collect();
    assert_eq!(usernames, vec!["alice".to_string(), "alice-2".to_string()]);
    let group_names: Vec<_> = snapshot
        .groups()
        .iter()
        .filter(|g| !g.is_synthetic)
        .map(|g| g.name.clone())
        .collect();
    assert_eq!(group_names, vec!["devs".to_string(), "devs-2".to_string()]);
}

#[test]
fn identical_inputs_build_equal_snapshots() {
    let config = BuildConfig {
        features: vec![Feature::SyntheticPrimaryGroup, Feature::MirrorNestedGroups],
        ..Default::default()
    };

    let (mut uid_a, mut gid_a) = allocators();
    let (first, _) = build_snapshot(&sample_output(), &mut uid_a, &mut gid_a, &config, 1);

    let (mut uid_b, mut gid_b) = allocators();
    let (second, _) = build_snapshot(&sample_output(), &mut uid_b, &mut gid_b, &config, 2);

    assert_eq!(first, second);
}

#[tokio::test]
async fn restart_with_persisted_mappings_preserves_ids() {
    let store = MemoryMappingStore::new();
    let config = BuildConfig {
        features: vec![Feature::SyntheticPrimaryGroup],
        ..Default::default()
    };

    // First process lifetime: build and persist.
    let (mut uid_alloc, mut gid_alloc) = allocators();
    let (first, new_mappings) =
        build_snapshot(&sample_output(), &mut uid_alloc, &mut gid_alloc, &config, 1);
    for mapping in &new_mappings {
        store.put(&mapping.key, &MappingRecord::from(mapping)).await.unwrap();
    }

    // Second lifetime: fresh allocators seeded from the store.
    let records = store.list().await.unwrap();
    let (mut uid_alloc, mut gid_alloc) = allocators();
    seed_allocators(&records, &mut uid_alloc, &mut gid_alloc);
    let (second, fresh) =
        build_snapshot(&sample_output(), &mut uid_alloc, &mut gid_alloc, &config, 1);

    assert!(fresh.is_empty(), "no new allocations expected: {fresh:?}");
    for user in first.users() {
        let again = second.user_by_id(&user.id).unwrap();
        assert_eq!(user.uid_number, again.uid_number, "user {}", user.username);
    }
    for group in first.groups() {
        let again = second.group_by_id(&group.id).unwrap();
        assert_eq!(group.gid_number, again.gid_number, "group {}", group.name);
    }
}
