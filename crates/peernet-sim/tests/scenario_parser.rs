//! Parser totality: every command parses from valid input, and every
//! violated constraint produces an error naming the line.

use peernet_sim::scenario::{parse_scenario, Command};

fn parse_one(line: &str) -> Command {
    let commands = parse_scenario(line).expect("scenario should parse");
    assert_eq!(commands.len(), 1);
    commands.into_iter().next().unwrap().command
}

fn parse_err(text: &str) -> String {
    parse_scenario(text).expect_err("scenario should fail").to_string()
}

#[test]
fn comments_and_blank_lines_are_skipped() {
    let text = "# a comment\n\n   \nDelay 5\n# another\n";
    let commands = parse_scenario(text).unwrap();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].line, 4);
}

#[test]
fn tokens_split_on_runs_of_spaces() {
    match parse_one("Delay    2.5") {
        Command::Delay { seconds } => assert_eq!(seconds, 2.5),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn profile_server_parses() {
    match parse_one("ProfileServer A 2 10000 10.0 20.0 50000") {
        Command::ProfileServer(create) => {
            assert_eq!(create.group, "A");
            assert_eq!(create.count, 2);
            assert_eq!(create.base_port, 10_000);
            assert_eq!(create.latitude, 10.0);
            assert_eq!(create.longitude, 20.0);
            assert_eq!(create.radius, 50_000);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn server_count_and_port_ranges_are_enforced() {
    assert!(parse_err("ProfileServer A 0 10000 0.0 0.0 0").contains("line 1"));
    assert!(parse_err("ProfileServer A 1000 10000 0.0 0.0 0").contains("count"));
    // 65535 - 20*2 = 65495 is the highest legal base for two servers.
    parse_scenario("ProfileServer A 2 65495 0.0 0.0 0").unwrap();
    assert!(parse_err("ProfileServer A 2 65496 0.0 0.0 0").contains("basePort"));
    assert!(parse_err("ProfileServer A 1 10000 90.5 0.0 0").contains("lat"));
    assert!(parse_err("ProfileServer A 1 10000 0.0 -180.0 0").contains("lon"));
    parse_scenario("ProfileServer A 1 10000 0.0 180.0 0").unwrap();
    assert!(parse_err("ProfileServer A 1 10000 0.0 0.0 20000001").contains("radius"));
}

#[test]
fn overlapping_port_blocks_fail_at_parse_time() {
    let text = "ProfileServer A 2 10000 0.0 0.0 0\nProximityServer B 1 10039 0.0 0.0 0\n";
    let err = parse_err(text);
    assert!(err.contains("line 2"), "{err}");
    assert!(err.contains("overlaps"), "{err}");

    // Adjacent blocks are fine.
    let text = "ProfileServer A 2 10000 0.0 0.0 0\nProximityServer B 1 10040 0.0 0.0 0\n";
    parse_scenario(text).unwrap();
}

#[test]
fn start_server_ranges_are_bounded() {
    match parse_one("StartServer A 1 2") {
        Command::StartServer(range) => {
            assert_eq!((range.index, range.count), (1, 2));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(parse_err("StartServer A 0 2").contains("index"));
    assert!(parse_err("StartServer A 999 2").contains("1000"));
    assert!(parse_err("StartServer A 1").contains("missing argument"));
}

#[test]
fn neighborhood_takes_triples() {
    match parse_one("Neighborhood A 1 2 B 1 1") {
        Command::Neighborhood(ranges) => {
            assert_eq!(ranges.len(), 2);
            assert_eq!(ranges[0].group, "A");
            assert_eq!(ranges[1].group, "B");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(parse_err("Neighborhood A 1").contains("triples"));
    assert!(parse_err("Neighborhood").contains("triples"));
}

#[test]
fn neighbor_needs_at_least_one_target() {
    match parse_one("Neighbor A001 A002 A003") {
        Command::Neighbor { source, targets } => {
            assert_eq!(source, "A001");
            assert_eq!(targets, vec!["A002".to_string(), "A003".to_string()]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(parse_err("Neighbor A001").contains("target"));
}

#[test]
fn identity_parses_and_validates_capacity() {
    match parse_one("Identity Ia 110 Test 10.0 20.0 50000 * 80 * 80 A 1 1") {
        Command::Identity(create) => {
            assert_eq!(create.group, "Ia");
            assert_eq!(create.create_count, 110);
            assert_eq!(create.identity_type, "Test");
            assert_eq!(create.profile_image_chance, 80);
            assert_eq!(create.servers.group, "A");
        }
        other => panic!("unexpected {other:?}"),
    }
    // 20,001 identities cannot fit one server.
    assert!(
        parse_err("Identity Ia 20001 T 0.0 0.0 0 * 0 * 0 A 1 1").contains("capacity")
    );
    parse_scenario("Identity Ia 20001 T 0.0 0.0 0 * 0 * 0 A 1 2").unwrap();
    assert!(parse_err("Identity Ia 110 T 0.0 0.0 0 * 101 * 0 A 1 1").contains("profileChance"));
}

#[test]
fn cancel_identity_bounds() {
    match parse_one("CancelIdentity Ia 1000 100") {
        Command::CancelIdentity {
            group,
            index,
            count,
        } => {
            assert_eq!(group, "Ia");
            assert_eq!((index, count), (1_000, 100));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(parse_err("CancelIdentity Ia 99999 2").contains("100000"));
}

#[test]
fn activity_parses_and_validates_times() {
    match parse_one("Activity A 10 10.0 20.0 0 1000 50000 -3600 3600 7200 14400 I 1 1") {
        Command::Activity(create) => {
            assert_eq!(create.group, "A");
            assert_eq!(create.create_count, 10);
            assert_eq!((create.precision_min, create.precision_max), (0, 1_000));
            assert_eq!((create.start_from, create.start_to), (-3_600, 3_600));
            assert_eq!((create.lifetime_from, create.lifetime_to), (7_200, 14_400));
            assert_eq!(create.owners.group, "I");
        }
        other => panic!("unexpected {other:?}"),
    }
    // precMin > precMax
    assert!(parse_err(
        "Activity A 1 0.0 0.0 500 100 0 0 0 10 10 I 1 1"
    )
    .contains("precMin"));
    // start beyond range
    assert!(parse_err(
        "Activity A 1 0.0 0.0 0 0 0 -86001 0 10 10 I 1 1"
    )
    .contains("startFrom"));
    // everything expired at creation
    assert!(parse_err(
        "Activity A 1 0.0 0.0 0 0 0 -3600 -3600 3600 3600 I 1 1"
    )
    .contains("positive"));
    // latest expiration beyond a day
    assert!(parse_err(
        "Activity A 1 0.0 0.0 0 0 0 86000 86000 86400 86400 I 1 1"
    )
    .contains("86400"));
}

#[test]
fn delete_activity_bounds() {
    match parse_one("DeleteActivity A 5 3") {
        Command::DeleteActivity { index, count, .. } => {
            assert_eq!((index, count), (5, 3));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(parse_err("DeleteActivity A 50000 2").contains("50001"));
}

#[test]
fn test_query_parses_with_and_without_location() {
    match parse_one("TestQuery A 1 2 I* * true 10.0 20.0 30000") {
        Command::TestQuery(query) => {
            assert_eq!(query.name_filter, "I*");
            assert_eq!(query.type_filter, "*");
            assert!(query.include_images);
            assert_eq!(query.location, Some((10.0, 20.0)));
            assert_eq!(query.radius, 30_000);
        }
        other => panic!("unexpected {other:?}"),
    }
    match parse_one("TestQuery A 1 1 ** ** false NO_LOCATION NO_LOCATION 0") {
        Command::TestQuery(query) => {
            assert!(query.location.is_none());
            assert!(!query.include_images);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(parse_err("TestQuery A 1 1 * * maybe NO_LOCATION NO_LOCATION 0")
        .contains("includeImages"));
    assert!(parse_err("TestQuery A 1 1 * * true NO_LOCATION 20.0 0").contains("NO_LOCATION"));
}

#[test]
fn test_query_activity_time_sentinels() {
    match parse_one("TestQueryActivity PX 1 2 ** ANY ANY NO_LOCATION NO_LOCATION 0") {
        Command::TestQueryActivity(query) => {
            assert!(query.start_not_after.is_none());
            assert!(query.expiration_not_before.is_none());
            assert!(query.location.is_none());
        }
        other => panic!("unexpected {other:?}"),
    }
    match parse_one("TestQueryActivity PX 1 1 Run* -100 3600 10.0 20.0 1000") {
        Command::TestQueryActivity(query) => {
            assert_eq!(query.start_not_after, Some(-100));
            assert_eq!(query.expiration_not_before, Some(3_600));
        }
        other => panic!("unexpected {other:?}"),
    }
    // When both bounds are present they must be ordered.
    assert!(
        parse_err("TestQueryActivity PX 1 1 ** 3600 3600 NO_LOCATION NO_LOCATION 0")
            .contains("before")
    );
}

#[test]
fn delay_must_be_positive() {
    assert!(parse_err("Delay 0").contains("positive"));
    assert!(parse_err("Delay -1").contains("positive"));
    assert!(parse_err("Delay fast").contains("decimal"));
}

#[test]
fn load_snapshot_must_come_first() {
    parse_scenario("LoadSnapshot S\nDelay 1\n").unwrap();
    let err = parse_err("Delay 1\nLoadSnapshot S\n");
    assert!(err.contains("line 2"));
    assert!(err.contains("first command"));
}

#[test]
fn snapshot_names_are_plain() {
    match parse_one("TakeSnapshot nightly") {
        Command::TakeSnapshot { name } => assert_eq!(name, "nightly"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(parse_err("TakeSnapshot ../escape").contains("plain name"));
}

#[test]
fn debug_mode_is_on_or_off() {
    assert_eq!(parse_one("DebugMode on"), Command::DebugMode { enabled: true });
    assert_eq!(
        parse_one("DebugMode off"),
        Command::DebugMode { enabled: false }
    );
    assert!(parse_err("DebugMode sometimes").contains("'on' or 'off'"));
}

#[test]
fn unknown_commands_and_trailing_tokens_fail() {
    assert!(parse_err("FlyToTheMoon").contains("unknown command"));
    assert!(parse_err("Delay 1 2").contains("trailing"));
}

#[test]
fn errors_carry_the_line_number() {
    let text = "Delay 1\nDelay 1\nStartServer A 0 1\n";
    let err = parse_scenario(text).unwrap_err();
    assert_eq!(err.line, 3);
}

#[test]
fn whole_example_scenario_parses() {
    let text = "\
# two-server propagation
ProfileServer A 2 10000 10.0 20.0 50000
Neighborhood A 1 2
StartServer A 1 2
Identity Ia 110 Test 10.0 20.0 50000 * 80 * 80 A 1 1
Delay 30
TestQuery A 1 2 I* * true 10.0 20.0 30000
StopServer A 2 1
StartServer A 2 1
Delay 660
TestQuery A 1 2 I* * true 10.0 20.0 30000
TakeSnapshot S
";
    let commands = parse_scenario(text).unwrap();
    assert_eq!(commands.len(), 11);
}
