//! End-to-end tests of the query path built from the sample dataset document

use tollgate_core::{DatasetDefinition, DatasetDocument};
use tollgate_query::{
    check_all, format_query, ConditionChecker, QueryError, QueryParser, QueryPipeline,
    SettingValue,
};

const EAP_ITEMS: &str = include_str!("../../../config/datasets/eap_items.yaml");

fn definition() -> DatasetDefinition {
    DatasetDocument::from_yaml_str(EAP_ITEMS)
        .unwrap()
        .into_definition()
        .unwrap()
}

fn query_path() -> (QueryPipeline, Vec<ConditionChecker>) {
    let definition = definition();
    let pipeline = QueryPipeline::build(&definition.query_processors, &definition).unwrap();
    let checkers = definition
        .mandatory_condition_checkers
        .iter()
        .map(|spec| ConditionChecker::from_spec(spec, &definition))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    (pipeline, checkers)
}

#[test]
fn test_sample_document_builds_every_stage() {
    let (pipeline, checkers) = query_path();
    assert_eq!(
        pipeline.stage_names(),
        vec![
            "UniqInSelectAndHavingProcessor",
            "UUIDColumnProcessor",
            "HexIntColumnProcessor",
            "TupleUnaliaser",
            "ClickhouseSettingsOverride",
        ]
    );
    assert_eq!(checkers.len(), 1);
    assert_eq!(checkers[0].field_name(), "organization_id");
}

#[test]
fn test_rewrite_check_and_format() {
    let (pipeline, checkers) = query_path();
    let query = QueryParser::new()
        .parse(
            "SELECT span_id, count() AS c FROM eap_items \
             WHERE organization_id = 1 AND span_id = '1a2b' \
             GROUP BY span_id ORDER BY c DESC LIMIT 10",
        )
        .unwrap();

    let processed = pipeline.apply(query).unwrap();
    check_all(&checkers, &processed).unwrap();

    let formatted = format_query(&processed, &definition().dist_table_name);
    assert_eq!(
        formatted.sql,
        "SELECT (lower(hex(span_id)) AS _hex_span_id), (count() AS c) FROM eap_items_dist \
         WHERE and(equals(organization_id, 1), equals(span_id, 6699)) \
         GROUP BY lower(hex(span_id)) ORDER BY c DESC LIMIT 10"
    );
    assert_eq!(
        processed.settings.get("group_by_overflow_mode"),
        Some(&SettingValue::String("any".into()))
    );
}

#[test]
fn test_static_settings_win_over_caller() {
    let (pipeline, _) = query_path();
    let mut query = QueryParser::new()
        .parse("SELECT count() FROM eap_items WHERE organization_id = 1")
        .unwrap();
    query.set_setting("max_rows_to_group_by", SettingValue::Int(5));
    query.set_setting("max_execution_time", SettingValue::Int(30));

    let processed = pipeline.apply(query).unwrap();
    assert_eq!(processed.settings["max_rows_to_group_by"].as_int(), Some(1_000_000));
    assert_eq!(processed.settings["max_execution_time"].as_int(), Some(30));
}

#[test]
fn test_missing_org_predicate_rejected_after_rewrite() {
    let (pipeline, checkers) = query_path();
    let query = QueryParser::new()
        .parse("SELECT count() FROM eap_items WHERE project_id = 2")
        .unwrap();
    let processed = pipeline.apply(query).unwrap();
    let err = check_all(&checkers, &processed).unwrap_err();
    assert!(matches!(err, QueryError::MissingCondition { .. }));
}

#[test]
fn test_invalid_trace_id_fails_whole_pipeline() {
    let (pipeline, _) = query_path();
    let query = QueryParser::new()
        .parse("SELECT count() FROM eap_items WHERE organization_id = 1 AND trace_id = 'abc'")
        .unwrap();
    assert!(matches!(
        pipeline.apply(query),
        Err(QueryError::Processor { .. })
    ));
}

#[test]
fn test_pipeline_idempotent_on_sample_document() {
    let (pipeline, _) = query_path();
    let query = QueryParser::new()
        .parse(
            "SELECT parent_span_id, uniq(name) AS names FROM eap_items \
             WHERE organization_id = 1 AND trace_id IN ('7400045b25c443b885914600aa83ad04') \
             GROUP BY parent_span_id HAVING uniq(name) > 2",
        )
        .unwrap();
    let once = pipeline.apply(query).unwrap();
    assert_eq!(pipeline.apply(once.clone()).unwrap(), once);
}
