use std::collections::BTreeSet;

use time::PrimitiveDateTime;
use time::macros::datetime;
use turtlecli::models::ExecutionState;
use turtlecli::query::{
    FilterCriteria, MatchMode, QueryContext, QuerySpec, SortDirection, SortField, SortSpec,
    TimeOptions,
};
use turtlecli::scanlog::NoScanLogs;
use turtlecli::store::{HistoryStore, QueryOutcome};
use turtlecli::store::seed::{FixtureExecution, HistoryFixture};

const NOW: PrimitiveDateTime = datetime!(2021-06-15 12:00:00);

fn seeded_store() -> HistoryStore {
    let store = HistoryStore::open_in_memory().expect("store should open");
    let mut fixture = HistoryFixture::new(&store);
    let executions = [
        FixtureExecution {
            project: "AGBT19A_453",
            script: "track",
            observer: "Alice",
            operator: "Oscar",
            executed_at: datetime!(2019-03-05 04:00:00),
            state: ExecutionState::Completed,
            executed_script: "foo = \"bar\"\nTrack()\n",
            log: "scan 1 ok",
        },
        FixtureExecution {
            project: "AGBT19A_453",
            script: "Peak",
            observer: "Bob",
            operator: "Oscar",
            executed_at: datetime!(2019-03-05 05:00:00),
            state: ExecutionState::Aborted,
            executed_script: "foo = 'baz'\nPeak()\n",
            log: "error: lost LOCK",
        },
        FixtureExecution {
            project: "AGBT19B_001",
            script: "track",
            observer: "Carol",
            operator: "Pat",
            executed_at: datetime!(2019-09-01 12:00:00),
            state: ExecutionState::InProgress,
            executed_script: "Slew()\n",
            log: "",
        },
        FixtureExecution {
            project: "TGBT20A_500",
            script: "focus",
            observer: "Alice",
            operator: "Pat",
            executed_at: datetime!(2020-01-01 00:10:00),
            state: ExecutionState::Completed,
            executed_script: "foo=\"bar\"\n",
            log: "",
        },
    ];
    for execution in &executions {
        fixture.record(execution).expect("execution should insert");
    }
    store
}

fn query(store: &HistoryStore, criteria: &FilterCriteria) -> (QuerySpec, QueryOutcome) {
    let context = QueryContext::new(&NoScanLogs, NOW);
    let spec = context.compose(criteria).expect("criteria should compose");
    let outcome = context.execute(store, &spec).expect("query should run");
    (spec, outcome)
}

fn run(store: &HistoryStore, criteria: &FilterCriteria) -> Vec<String> {
    let (_, outcome) = query(store, criteria);
    outcome
        .records
        .into_iter()
        .map(|record| format!("{}/{}", record.script_name, record.observer_name))
        .collect()
}

fn run_set(store: &HistoryStore, criteria: &FilterCriteria) -> BTreeSet<String> {
    run(store, criteria).into_iter().collect()
}

fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_string()).collect()
}

#[test]
fn exact_match_is_case_insensitive_and_values_are_alternatives() {
    let store = seeded_store();
    let rows = run_set(
        &store,
        &FilterCriteria {
            observers: names(&["alice", "BOB"]),
            ..FilterCriteria::default()
        },
    );
    assert_eq!(
        rows,
        BTreeSet::from([
            "track/Alice".to_string(),
            "Peak/Bob".to_string(),
            "focus/Alice".to_string(),
        ])
    );
}

#[test]
fn exact_match_does_not_match_substrings() {
    let store = seeded_store();
    let rows = run(
        &store,
        &FilterCriteria {
            scripts: names(&["rac"]),
            ..FilterCriteria::default()
        },
    );
    assert!(rows.is_empty());
}

#[test]
fn fuzzy_match_finds_substrings() {
    let store = seeded_store();
    let rows = run_set(
        &store,
        &FilterCriteria {
            scripts: names(&["RAC"]),
            mode: MatchMode::Fuzzy,
            ..FilterCriteria::default()
        },
    );
    assert_eq!(
        rows,
        BTreeSet::from(["track/Alice".to_string(), "track/Carol".to_string()])
    );
}

#[test]
fn regex_match_is_unanchored_and_case_insensitive() {
    let store = seeded_store();
    let rows = run(
        &store,
        &FilterCriteria {
            projects: names(&["^agbt19"]),
            mode: MatchMode::Regex,
            ..FilterCriteria::default()
        },
    );
    assert_eq!(rows.len(), 3);
}

#[test]
fn filters_on_different_fields_intersect() {
    let store = seeded_store();
    let by_observer = run_set(
        &store,
        &FilterCriteria {
            observers: names(&["Alice"]),
            ..FilterCriteria::default()
        },
    );
    let by_operator = run_set(
        &store,
        &FilterCriteria {
            operators: names(&["Pat"]),
            ..FilterCriteria::default()
        },
    );
    let both = run_set(
        &store,
        &FilterCriteria {
            observers: names(&["Alice"]),
            operators: names(&["Pat"]),
            ..FilterCriteria::default()
        },
    );

    let intersection = by_observer
        .intersection(&by_operator)
        .cloned()
        .collect::<BTreeSet<_>>();
    assert_eq!(both, intersection);
    assert_eq!(both, BTreeSet::from(["focus/Alice".to_string()]));
}

#[test]
fn limit_caps_rows_but_not_the_matched_count() {
    let store = seeded_store();

    let (_, unlimited) = query(&store, &FilterCriteria::default());
    assert_eq!(unlimited.records.len(), 4);
    assert_eq!(unlimited.matched_count, 4);

    let (_, limited) = query(
        &store,
        &FilterCriteria {
            limit: 2,
            ..FilterCriteria::default()
        },
    );
    assert_eq!(limited.matched_count, 4);
    let newest = limited
        .records
        .iter()
        .map(|record| record.script_name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(newest, vec!["focus", "track"]);
}

#[test]
fn keyword_search_requires_the_exact_value() {
    let store = seeded_store();
    let bar = run_set(
        &store,
        &FilterCriteria {
            keywords: names(&["foo=bar"]),
            ..FilterCriteria::default()
        },
    );
    assert_eq!(
        bar,
        BTreeSet::from(["track/Alice".to_string(), "focus/Alice".to_string()])
    );

    let baz = run(
        &store,
        &FilterCriteria {
            keywords: names(&["foo=baz"]),
            ..FilterCriteria::default()
        },
    );
    assert_eq!(baz, vec!["Peak/Bob".to_string()]);

    let either = run(
        &store,
        &FilterCriteria {
            keywords: names(&["foo=bar", "foo=baz"]),
            ..FilterCriteria::default()
        },
    );
    assert_eq!(either.len(), 3);
}

#[test]
fn state_and_log_search_combine() {
    let store = seeded_store();
    let rows = run(
        &store,
        &FilterCriteria {
            states: vec![ExecutionState::Aborted, ExecutionState::InProgress],
            search_logs: names(&["lost lock"]),
            ..FilterCriteria::default()
        },
    );
    assert_eq!(rows, vec!["Peak/Bob".to_string()]);
}

#[test]
fn absolute_range_is_inclusive() {
    let store = seeded_store();
    let rows = run(
        &store,
        &FilterCriteria {
            time: TimeOptions {
                after: Some(datetime!(2019-03-05 05:00:00)),
                before: Some(datetime!(2019-09-01 12:00:00)),
                ..TimeOptions::default()
            },
            sort: SortSpec {
                field: SortField::Datetime,
                direction: SortDirection::Ascending,
            },
            ..FilterCriteria::default()
        },
    );
    assert_eq!(rows, vec!["Peak/Bob".to_string(), "track/Carol".to_string()]);
}

#[test]
fn instant_window_uses_a_fifteen_minute_default_buffer() {
    let store = seeded_store();
    let rows = run(
        &store,
        &FilterCriteria {
            time: TimeOptions {
                instants: vec![datetime!(2020-01-01 00:00:00)],
                ..TimeOptions::default()
            },
            ..FilterCriteria::default()
        },
    );
    assert_eq!(rows, vec!["focus/Alice".to_string()]);
}

#[test]
fn sorting_by_observer_breaks_ties_by_id() {
    let store = seeded_store();
    let rows = run(
        &store,
        &FilterCriteria {
            sort: SortSpec {
                field: SortField::Observer,
                direction: SortDirection::Ascending,
            },
            ..FilterCriteria::default()
        },
    );
    assert_eq!(
        rows,
        names(&["track/Alice", "focus/Alice", "Peak/Bob", "track/Carol"])
    );
}

#[test]
fn no_matches_is_an_empty_result_not_an_error() {
    let store = seeded_store();
    let (spec, outcome) = query(
        &store,
        &FilterCriteria {
            observers: names(&["nobody"]),
            ..FilterCriteria::default()
        },
    );
    assert!(outcome.records.is_empty());
    assert_eq!(outcome.matched_count, 0);
    assert!(spec.describe().starts_with("by observer [\"nobody\"]"));
}

#[test]
fn case_folding_covers_non_ascii_letters_in_every_mode() {
    let store = HistoryStore::open_in_memory().expect("store should open");
    let mut fixture = HistoryFixture::new(&store);
    fixture
        .record(&FixtureExecution {
            project: "AGBT19A_453",
            script: "Ångström scan",
            observer: "Émile",
            operator: "Oscar",
            executed_at: datetime!(2019-03-05 04:00:00),
            state: ExecutionState::Completed,
            executed_script: "",
            log: "",
        })
        .expect("execution should insert");

    for (criteria, label) in [
        (
            FilterCriteria {
                observers: names(&["émile"]),
                ..FilterCriteria::default()
            },
            "exact",
        ),
        (
            FilterCriteria {
                scripts: names(&["ÅNGSTRÖM"]),
                mode: MatchMode::Fuzzy,
                ..FilterCriteria::default()
            },
            "fuzzy",
        ),
        (
            FilterCriteria {
                observers: names(&["^émile$"]),
                mode: MatchMode::Regex,
                ..FilterCriteria::default()
            },
            "regex",
        ),
    ] {
        assert_eq!(
            run(&store, &criteria),
            vec!["Ångström scan/Émile".to_string()],
            "{label} mode should fold non-ASCII case"
        );
    }
}

#[test]
fn t_separated_store_timestamps_are_rejected_on_decode() {
    let store = seeded_store();
    store
        .connection()
        .execute(
            "UPDATE History SET datetime = '2019-03-05T04:00:00' WHERE datetime = '2019-03-05 04:00:00'",
            [],
        )
        .expect("row should update");

    let context = QueryContext::new(&NoScanLogs, NOW);
    let spec = context
        .compose(&FilterCriteria::default())
        .expect("criteria should compose");
    let err = context
        .execute(&store, &spec)
        .expect_err("a T-separated row must not decode");
    assert!(
        format!("{err:#}").contains("invalid datetime"),
        "unexpected error: {err:#}"
    );
}
