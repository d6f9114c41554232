use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use horizontalizer::aggregate::{Aggregated, Mean, round_to_places};
use horizontalizer::bucket::bucket_of;
use horizontalizer::pipeline::aggregate_batches;
use horizontalizer::reader::ChunkedReader;
use horizontalizer::{
    CancelToken, ErrorKind, FailurePolicy, Pipeline, PipelineConfig, TranslationTable,
};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;

const HEADER: &str = "asset,date,time,variable,value\n";

// 2015-05-01T00:00:00Z
const DAY_START: i64 = 1_430_438_400;

const TRANSLATIONS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<translations>
  <asset name="T00">
    <translation><src>v1</src><dest>WindSpeed</dest></translation>
    <translation><src>v2</src><dest>Power</dest></translation>
  </asset>
  <asset name="T01">
    <translation><src>v1</src><dest>WindSpeed</dest></translation>
    <translation><src>v2</src><dest>Power</dest></translation>
  </asset>
  <asset name="T02">
    <translation><src>w7</src><dest>WindSpeed</dest></translation>
    <translation><src>v2</src><dest>Power</dest></translation>
  </asset>
</translations>"#;

fn table() -> TranslationTable {
    TranslationTable::from_reader(TRANSLATIONS.as_bytes()).unwrap()
}

/// One synthetic reading per index; values are multiples of 0.25 so sums are
/// exact whatever the folding order.
fn reading(i: usize) -> (String, i64, &'static str, Option<f64>) {
    let asset = format!("T0{}", i % 3);
    let minute = ((i * 7) % 1440) as i64;
    let variable = match (i % 3, i % 2) {
        (2, 0) => "w7",
        (_, 0) => "v1",
        _ => "v2",
    };
    let value = (i % 11 != 0).then(|| (i % 97) as f64 * 0.25);
    (asset, minute, variable, value)
}

fn csv_body(n: usize) -> String {
    let mut body = String::from(HEADER);
    for i in 0..n {
        let (asset, minute, variable, value) = reading(i);
        let value = value.map(|v| v.to_string()).unwrap_or_default();
        body.push_str(&format!(
            "{asset},2015-05-01,{:02}:{:02}:{:02},{variable},{value}\n",
            minute / 60,
            minute % 60,
            i % 60
        ));
    }
    body
}

fn write_gz(path: &Path, content: &str) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::fast());
    encoder.write_all(content.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn read_gz(path: &Path) -> String {
    let mut out = String::new();
    MultiGzDecoder::new(File::open(path).unwrap())
        .read_to_string(&mut out)
        .unwrap();
    out
}

fn aggregate_with<'t>(
    data: &str,
    table: &'t TranslationTable,
    chunk_size: usize,
    threads: usize,
) -> (Aggregated<'t>, usize) {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .unwrap();
    let reader = ChunkedReader::new(data.as_bytes(), chunk_size).unwrap();
    pool.install(|| aggregate_batches::<Mean, _>(reader, table, &CancelToken::new()))
        .unwrap()
}

#[test]
fn test_partitioning_does_not_change_result() {
    let table = table();
    let data = csv_body(5_000);

    let (whole, whole_batches) = aggregate_with(&data, &table, 5_000, 1);
    let (split, split_batches) = aggregate_with(&data, &table, 7, 4);
    let (uneven, _) = aggregate_with(&data, &table, 1_234, 3);

    assert_eq!(whole_batches, 1);
    assert_eq!(split_batches, 715);
    assert_eq!(whole.rows(), 5_000);
    assert_eq!(whole, split);
    assert_eq!(whole, uneven);
}

#[test]
fn test_means_match_reference() {
    let table = table();
    let n = 3_000;
    let data = csv_body(n);

    let mut reference: BTreeMap<(String, i64, &str), (f64, u32)> = BTreeMap::new();
    for i in 0..n {
        let (asset, minute, variable, value) = reading(i);
        let name = table.lookup(&asset, variable).unwrap();
        let cell = reference
            .entry((asset, bucket_of(DAY_START + minute * 60), name))
            .or_insert((0.0, 0));
        if let Some(v) = value {
            cell.0 += v;
            cell.1 += 1;
        }
    }

    let (aggregated, _) = aggregate_with(&data, &table, 100, 4);

    assert_eq!(aggregated.len(), reference.len());
    for ((asset, bucket, variable), (sum, count)) in &reference {
        let expected = (*count > 0).then(|| round_to_places(sum / *count as f64, 5));
        assert_eq!(
            aggregated.value(asset, *bucket, variable),
            Some(expected),
            "cell {asset}/{bucket}/{variable}"
        );
    }
}

#[test]
fn test_end_to_end_directory_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("raw");
    let output = dir.path().join("processed");
    fs::create_dir_all(&input).unwrap();

    let translations = dir.path().join("translations.xml.gz");
    write_gz(&translations, TRANSLATIONS);

    write_gz(
        &input.join("park_a.csv.gz"),
        &format!(
            "{HEADER}\
             T00,2015-05-01,00:00:30,v1,3\n\
             T00,2015-05-01,00:09:59,v1,4\n\
             T00,2015-05-01,00:10:00,v2,\n\
             T02,2015-05-01,23:59:00,w7,0.123456\n\
             T02,2015-05-01,23:59:10,w7,0.123458\n"
        ),
    );
    write_gz(
        &input.join("park_b.csv.gz"),
        &format!("{HEADER}T01,2015-05-01,12:00,v2,1000\n"),
    );

    let table = TranslationTable::load(&translations).unwrap();
    let config = PipelineConfig {
        chunk_size: 2,
        threads: 2,
        ..PipelineConfig::new(&input, &output)
    };
    let report = Pipeline::new(config, &table, CancelToken::new())
        .unwrap()
        .run()
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.total_rows(), 6);

    assert_eq!(
        read_gz(&output.join("park_a.csv.gz")),
        "asset,unixtime,Power,WindSpeed\n\
         T00,1430439000,,3.5\n\
         T00,1430439600,,\n\
         T02,1430524800,,0.12346\n"
    );
    assert_eq!(
        read_gz(&output.join("park_b.csv.gz")),
        "asset,unixtime,Power\nT01,1430482200,1000\n"
    );
}

#[test]
fn test_unknown_code_fails_only_that_file() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("raw");
    let output = dir.path().join("processed");
    fs::create_dir_all(&input).unwrap();

    // T02 reports wind speed as w7, not v1
    write_gz(
        &input.join("a.csv.gz"),
        &format!("{HEADER}T00,2015-05-01,00:01,v1,1\nT02,2015-05-01,00:02,v1,2\n"),
    );
    write_gz(
        &input.join("b.csv.gz"),
        &format!("{HEADER}T00,2015-05-01,00:01,v1,1\n"),
    );

    let table = table();
    let config = PipelineConfig {
        on_error: FailurePolicy::Continue,
        ..PipelineConfig::new(&input, &output)
    };
    let report = Pipeline::new(config, &table, CancelToken::new())
        .unwrap()
        .run()
        .unwrap();

    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, ErrorKind::Translation);
    assert!(report.failed[0].message.contains("`T02`"));
    assert!(!output.join("a.csv.gz").exists());
    assert!(output.join("b.csv.gz").exists());
}

#[test]
fn test_malformed_value_reports_line() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("raw");
    let output = dir.path().join("processed");
    fs::create_dir_all(&input).unwrap();

    write_gz(
        &input.join("a.csv.gz"),
        &format!("{HEADER}T00,2015-05-01,00:01,v1,1\nT00,2015-05-01,00:02,v1,fast\n"),
    );

    let table = table();
    let report = Pipeline::new(
        PipelineConfig::new(&input, &output),
        &table,
        CancelToken::new(),
    )
    .unwrap()
    .run()
    .unwrap();

    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, ErrorKind::Parse);
    assert!(report.failed[0].message.contains("`fast`"));
    assert!(report.failed[0].message.contains("line 3"));
}

#[test]
fn test_empty_file_produces_header_only() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("raw");
    let output = dir.path().join("processed");
    fs::create_dir_all(&input).unwrap();
    write_gz(&input.join("empty.csv.gz"), HEADER);

    let table = table();
    let report = Pipeline::new(
        PipelineConfig::new(&input, &output),
        &table,
        CancelToken::new(),
    )
    .unwrap()
    .run()
    .unwrap();

    assert!(report.is_success());
    assert_eq!(report.processed[0].batches, 0);
    assert_eq!(read_gz(&output.join("empty.csv.gz")), "asset,unixtime\n");
}

#[test]
#[ignore = "writes and aggregates ten million rows twice"]
fn test_ten_million_rows_in_million_row_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.csv.gz");
    let rows = 10_000_000;

    let mut encoder = GzEncoder::new(
        BufWriter::new(File::create(&path).unwrap()),
        Compression::fast(),
    );
    encoder.write_all(HEADER.as_bytes()).unwrap();
    for i in 0..rows {
        let minute = i % 1440;
        writeln!(
            encoder,
            "T0{},2015-05-01,{:02}:{:02},v2,{}",
            i % 3,
            minute / 60,
            minute % 60,
            i % 4
        )
        .unwrap();
    }
    encoder.finish().unwrap().flush().unwrap();

    let table = table();
    let reader = ChunkedReader::open(&path, 1_000_000).unwrap();
    let (aggregated, batches) =
        aggregate_batches::<Mean, _>(reader, &table, &CancelToken::new()).unwrap();

    let reader = ChunkedReader::open(&path, rows).unwrap();
    let (single, single_batches) =
        aggregate_batches::<Mean, _>(reader, &table, &CancelToken::new()).unwrap();

    assert_eq!(batches, 10);
    assert_eq!(single_batches, 1);
    assert_eq!(aggregated, single);
    assert_eq!(aggregated.rows(), rows as u64);
    // 3 assets x 144 buckets, one variable
    assert_eq!(aggregated.len(), 432);
    assert!(
        aggregated
            .iter()
            .all(|(_, value)| value.is_some_and(|v| (0.0..=3.0).contains(&v)))
    );
}
