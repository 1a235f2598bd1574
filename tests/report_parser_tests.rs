use std::fs;

use benchtrend::{
    BenchTrendError, Polarity,
    report::{config_identifier, list_report_files, parse_report_file, parse_report_str},
};

const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<testSuiteReport name="parsers">
  <configFile>config/parsers.xml</configFile>
  <resultUnit>ms</resultUnit>
  <dateTime>2024-03-01 10:00</dateTime>
  <driver name="sax">
    <description>streaming</description>
    <testCase name="small/doc">
      <resultValue>12.5</resultValue>
      <resultIterations>400</resultIterations>
    </testCase>
    <testCase name="large &amp; deep">
      <resultValue>  80 </resultValue>
    </testCase>
  </driver>
  <driver name="dom">
    <testCase name="small/doc">
      <resultValue>20</resultValue>
    </testCase>
  </driver>
</testSuiteReport>
"#;

#[test]
fn test_parses_drivers_cases_and_params() {
    let report = parse_report_str(SAMPLE, "sample.xml").unwrap();
    assert_eq!(report.config_id, "config.parsers.xml");
    assert_eq!(report.result_unit(), Some("ms"));
    assert_eq!(report.date_time(), Some("2024-03-01 10:00"));
    assert_eq!(report.drivers.len(), 2);

    let sax = report.driver("sax").unwrap();
    assert_eq!(sax.params.get("description").map(String::as_str), Some("streaming"));
    let small = sax.test_case("small/doc").unwrap();
    assert_eq!(small.result_value, 12.5);
    assert_eq!(small.measurement("resultIterations"), Some(400.0));
    assert_eq!(sax.test_case("large & deep").unwrap().result_value, 80.0);

    assert_eq!(report.result_values(), vec![12.5, 80.0, 20.0]);
    assert_eq!(report.polarity(), Polarity::LowerIsBetter);
}

#[test]
fn test_throughput_unit_flips_polarity() {
    let xml = SAMPLE.replace("<resultUnit>ms</resultUnit>", "<resultUnit>TPS</resultUnit>");
    let report = parse_report_str(&xml, "tps.xml").unwrap();
    assert_eq!(report.polarity(), Polarity::HigherIsBetter);
}

#[test]
fn test_config_identifier_flattens_separators() {
    assert_eq!(config_identifier(" suites/a\\b.xml "), "suites.a.b.xml");
    assert_eq!(config_identifier("plain.xml"), "plain.xml");
}

#[test]
fn test_missing_config_file_is_malformed() {
    let xml = SAMPLE.replace("<configFile>config/parsers.xml</configFile>", "");
    let err = parse_report_str(&xml, "noconfig.xml").unwrap_err();
    assert!(matches!(err, BenchTrendError::MalformedReport { .. }));
    assert!(err.to_string().contains("configFile"));
}

#[test]
fn test_config_file_naming_a_directory_is_malformed() {
    for config_file in [".", "..", " .. "] {
        let xml = SAMPLE.replace(
            "<configFile>config/parsers.xml</configFile>",
            &format!("<configFile>{config_file}</configFile>"),
        );
        let err = parse_report_str(&xml, "dir.xml").unwrap_err();
        assert!(matches!(err, BenchTrendError::MalformedReport { .. }), "{config_file:?}");
    }
}

#[test]
fn test_non_numeric_result_is_malformed() {
    let xml = SAMPLE.replace("<resultValue>20</resultValue>", "<resultValue>fast</resultValue>");
    let err = parse_report_str(&xml, "nan.xml").unwrap_err();
    assert!(matches!(err, BenchTrendError::MalformedReport { .. }));
    assert_eq!(err.report_path().unwrap().to_str(), Some("nan.xml"));
}

#[test]
fn test_missing_result_value_is_malformed() {
    let xml = SAMPLE.replace("<resultValue>20</resultValue>", "");
    assert!(parse_report_str(&xml, "missing.xml").is_err());
}

#[test]
fn test_wrong_root_and_truncated_documents_are_malformed() {
    assert!(parse_report_str("<report/>", "root.xml").is_err());
    assert!(parse_report_str("", "empty.xml").is_err());
    let truncated = &SAMPLE[..SAMPLE.len() / 2];
    assert!(parse_report_str(truncated, "cut.xml").is_err());
}

#[test]
fn test_test_case_without_name_is_malformed() {
    let xml = SAMPLE.replace("<testCase name=\"small/doc\">\n      <resultValue>20", "<testCase>\n      <resultValue>20");
    assert!(parse_report_str(&xml, "anon.xml").is_err());
}

#[test]
fn test_parse_report_file_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report.xml");
    fs::write(&path, SAMPLE).unwrap();
    let report = parse_report_file(&path).unwrap();
    assert_eq!(report.test_cases().count(), 3);

    let missing = parse_report_file(dir.path().join("absent.xml")).unwrap_err();
    assert!(matches!(missing, BenchTrendError::MalformedReport { .. }));
}

#[test]
fn test_list_report_files_filters_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b.xml"), SAMPLE).unwrap();
    fs::write(dir.path().join("a.xml"), SAMPLE).unwrap();
    fs::write(dir.path().join("notes.txt"), "x").unwrap();
    fs::create_dir(dir.path().join("nested.xml")).unwrap();

    let files = list_report_files(dir.path(), ".xml").unwrap();
    let names: Vec<_> = files
        .iter()
        .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["a.xml", "b.xml"]);

    let absent = list_report_files(dir.path().join("nope"), ".xml").unwrap();
    assert!(absent.is_empty());
}
