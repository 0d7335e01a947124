//! Assembly of the recalibration report from the final covariate tables.

use std::collections::BTreeMap;
use std::io::Write;

use super::table::{Cell, ColumnFormat, ReportTable};
use super::writer::{GatkReportWriter, TableSink};
use super::ReportError;
use crate::covariates::{
    context_to_string, decode_cycle, empirical_quality, error_prob_to_qual,
    estimated_reported_quality, CovariateChain, CovariateField, CovariateKey, CovariateSchema,
    CovariateTables, EmpiricalValue, EventType,
};
use crate::genomics::ReadGroupDatabase;
use crate::options::RecalibrationConfig;

const ARGUMENTS_TABLE: &str = "Arguments";
const READ_GROUP_TABLE: &str = "RecalTable0";
const QUALITY_TABLE: &str = "RecalTable1";
const COVARIATE_TABLE: &str = "RecalTable2";

/// Everything the report is built from.
#[derive(Debug, Clone, Copy)]
pub struct ReportInputs<'a> {
    /// Run configuration, echoed in the arguments table.
    pub config: &'a RecalibrationConfig,
    /// Final covariate tables.
    pub tables: &'a CovariateTables,
    /// Read-group names; unknown ids are printed as numbers.
    pub read_groups: &'a ReadGroupDatabase,
}

fn field(
    schema: &CovariateSchema,
    key: CovariateKey,
    field: CovariateField,
) -> Result<u32, ReportError> {
    schema
        .decode(key, field)
        .ok_or(ReportError::MissingField {
            table: schema.name(),
            field,
        })
}

fn event_type(schema: &CovariateSchema, key: CovariateKey) -> Result<EventType, ReportError> {
    let code = field(schema, key, CovariateField::EventType)?;
    EventType::from_code(code).ok_or(ReportError::InvalidEvent(code))
}

fn read_group_name(read_groups: &ReadGroupDatabase, id: u32) -> String {
    read_groups
        .name(id)
        .map_or_else(|| id.to_string(), str::to_string)
}

fn arguments_table(config: &RecalibrationConfig) -> Result<ReportTable, ReportError> {
    let covariates = &config.covariates;
    let baq = &config.baq;
    let mut table = ReportTable::new(
        ARGUMENTS_TABLE,
        "Recalibration argument collection values used in this run",
    )
    .with_column("Argument", ColumnFormat::Text)
    .with_column("Value", ColumnFormat::Text);

    let skip_mapq = baq
        .skip_mapq_at_least
        .map_or_else(|| "null".to_string(), |q| q.to_string());
    let mut rows: Vec<(&str, String)> = vec![
        ("baq", baq.enabled.to_string()),
        ("baq_band_radius", baq.band_radius.to_string()),
        (
            "baq_gap_open_penalty",
            format!("{:.1}", error_prob_to_qual(baq.gap_open)),
        ),
        ("baq_skip_mapq", skip_mapq),
        (
            "covariate",
            "ReadGroupCovariate,QualityScoreCovariate,ContextCovariate,CycleCovariate".to_string(),
        ),
        (
            "deletions_default_quality",
            covariates.deletion_quality.to_string(),
        ),
        (
            "indels_context_size",
            covariates.indel_context_size.to_string(),
        ),
        (
            "insertions_default_quality",
            covariates.insertion_quality.to_string(),
        ),
        ("low_quality_tail", covariates.low_quality_tail.to_string()),
        ("maximum_cycle_value", covariates.maximum_cycle.to_string()),
        ("min_base_quality", covariates.min_base_quality.to_string()),
        (
            "mismatches_context_size",
            covariates.mismatch_context_size.to_string(),
        ),
        ("mismatches_default_quality", "-1".to_string()),
    ];
    rows.sort_by(|a, b| a.0.cmp(b.0));
    for (argument, value) in rows {
        table.push_row(vec![argument.into(), value.into()])?;
    }
    Ok(table)
}

fn read_group_table(inputs: &ReportInputs<'_>) -> Result<ReportTable, ReportError> {
    let quality = inputs.tables.table(CovariateChain::QualityScore);
    let schema = quality.schema();

    let mut per_group: BTreeMap<(u32, u32), EmpiricalValue> = BTreeMap::new();
    for (key, value) in quality.iter() {
        let rg = field(schema, key, CovariateField::ReadGroup)?;
        let event = field(schema, key, CovariateField::EventType)?;
        *per_group.entry((rg, event)).or_default() += *value;
    }

    let mut table = ReportTable::new(READ_GROUP_TABLE, "")
        .with_column("ReadGroup", ColumnFormat::Text)
        .with_column("EventType", ColumnFormat::Text)
        .with_column("EmpiricalQuality", ColumnFormat::Float(4))
        .with_column("EstimatedQReported", ColumnFormat::Float(4))
        .with_column("Observations", ColumnFormat::Integer)
        .with_column("Errors", ColumnFormat::Float(2));
    for ((rg, code), value) in per_group {
        let event = EventType::from_code(code).ok_or(ReportError::InvalidEvent(code))?;
        let estimated =
            estimated_reported_quality(value.expected_errors.to_f64(), value.observations);
        table.push_row(vec![
            read_group_name(inputs.read_groups, rg).into(),
            event.as_char().into(),
            empirical_quality(value.observations, value.mismatches.to_f64(), estimated).into(),
            estimated.into(),
            value.observations.into(),
            value.mismatches.to_f64().into(),
        ])?;
    }
    Ok(table)
}

/// Empirical quality of a bucket whose prior is its reported quality `q`.
fn recalibrated(value: &EmpiricalValue, q: u32) -> f64 {
    empirical_quality(value.observations, value.mismatches.to_f64(), f64::from(q))
}

fn quality_score_table(inputs: &ReportInputs<'_>) -> Result<ReportTable, ReportError> {
    let quality = inputs.tables.table(CovariateChain::QualityScore);
    let schema = quality.schema();
    let mut table = ReportTable::new(QUALITY_TABLE, "")
        .with_column("ReadGroup", ColumnFormat::Text)
        .with_column("QualityScore", ColumnFormat::Text)
        .with_column("EventType", ColumnFormat::Text)
        .with_column("EmpiricalQuality", ColumnFormat::Float(4))
        .with_column("Observations", ColumnFormat::Integer)
        .with_column("Errors", ColumnFormat::Float(2));
    for (key, value) in quality.iter() {
        let rg = field(schema, key, CovariateField::ReadGroup)?;
        let q = field(schema, key, CovariateField::QualityScore)?;
        let event = event_type(schema, key)?;
        table.push_row(vec![
            read_group_name(inputs.read_groups, rg).into(),
            q.to_string().into(),
            event.as_char().into(),
            recalibrated(value, q).into(),
            value.observations.into(),
            value.mismatches.to_f64().into(),
        ])?;
    }
    Ok(table)
}

fn covariate_value(
    inputs: &ReportInputs<'_>,
    field: CovariateField,
    value: u32,
    event: EventType,
) -> String {
    match field {
        CovariateField::Context => {
            let size = match event {
                EventType::Mismatch => inputs.config.covariates.mismatch_context_size,
                EventType::Insertion | EventType::Deletion => {
                    inputs.config.covariates.indel_context_size
                }
            };
            context_to_string(value, size)
        }
        CovariateField::Cycle => decode_cycle(value).to_string(),
        _ => value.to_string(),
    }
}

fn covariate_table(inputs: &ReportInputs<'_>) -> Result<ReportTable, ReportError> {
    let mut table = ReportTable::new(COVARIATE_TABLE, "")
        .with_column("ReadGroup", ColumnFormat::Text)
        .with_column("QualityScore", ColumnFormat::Text)
        .with_column("CovariateValue", ColumnFormat::Text)
        .with_column("CovariateName", ColumnFormat::Text)
        .with_column("EventType", ColumnFormat::Text)
        .with_column("EmpiricalQuality", ColumnFormat::Float(4))
        .with_column("Observations", ColumnFormat::Integer)
        .with_column("Errors", ColumnFormat::Float(2));

    for chain in [CovariateChain::Context, CovariateChain::Cycle] {
        let Some(covariate) = chain.covariate_field() else {
            continue;
        };
        let empirical = inputs.tables.table(chain);
        let schema = empirical.schema();
        for (key, value) in empirical.iter() {
            let rg = field(schema, key, CovariateField::ReadGroup)?;
            let q = field(schema, key, CovariateField::QualityScore)?;
            let raw = field(schema, key, covariate)?;
            let event = event_type(schema, key)?;
            table.push_row(vec![
                read_group_name(inputs.read_groups, rg).into(),
                q.to_string().into(),
                covariate_value(inputs, covariate, raw, event).into(),
                Cell::from(chain.name()),
                event.as_char().into(),
                recalibrated(value, q).into(),
                value.observations.into(),
                value.mismatches.to_f64().into(),
            ])?;
        }
    }
    Ok(table)
}

/// Arguments, read-group, quality-score and covariate tables, in report order.
pub fn build_report(inputs: &ReportInputs<'_>) -> Result<Vec<ReportTable>, ReportError> {
    Ok(vec![
        arguments_table(inputs.config)?,
        read_group_table(inputs)?,
        quality_score_table(inputs)?,
        covariate_table(inputs)?,
    ])
}

/// Write the full recalibration report in GATK report format.
pub fn write_report<W: Write>(writer: W, inputs: &ReportInputs<'_>) -> Result<(), ReportError> {
    let tables = build_report(inputs)?;
    GatkReportWriter::new(writer).write_all_tables(&tables)
}

/// Render the report into a string (used for fingerprints and tests).
pub fn render_report(inputs: &ReportInputs<'_>) -> Result<String, ReportError> {
    let mut buffer = Vec::new();
    write_report(&mut buffer, inputs)?;
    String::from_utf8(buffer).map_err(|_| ReportError::NotUtf8)
}

/// Hex blake3 digest of a rendered report.
pub fn fingerprint(report: &str) -> String {
    blake3::hash(report.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariates::{CovariateChain, FixedCount, QUALITY_SCORE_SCHEMA};

    fn tables() -> CovariateTables {
        let mut tables = CovariateTables::new();
        let schema = QUALITY_SCORE_SCHEMA;
        let mut pairs = vec![
            (
                schema.encode(&[0, 30, EventType::Mismatch.code()]).unwrap(),
                EmpiricalValue {
                    observations: 1000,
                    mismatches: FixedCount::whole(1),
                    expected_errors: FixedCount::whole(1),
                },
            ),
            (
                schema.encode(&[0, 20, EventType::Mismatch.code()]).unwrap(),
                EmpiricalValue {
                    observations: 1000,
                    mismatches: FixedCount::whole(10),
                    expected_errors: FixedCount::whole(10),
                },
            ),
        ];
        pairs.sort_by_key(|p| p.0);
        tables
            .table_mut(CovariateChain::QualityScore)
            .merge_sorted(&pairs);
        tables
    }

    #[test]
    fn read_group_table_sums_over_qualities() {
        let config = RecalibrationConfig::default();
        let tables = tables();
        let mut groups = ReadGroupDatabase::new();
        groups.insert("rg1");
        let inputs = ReportInputs {
            config: &config,
            tables: &tables,
            read_groups: &groups,
        };
        let report = build_report(&inputs).unwrap();
        assert_eq!(report[0].name(), "Arguments");

        let rg_table = &report[1];
        assert_eq!(rg_table.rows().len(), 1);
        let row = &rg_table.rows()[0];
        assert_eq!(row[0], Cell::Text("rg1".into()));
        assert_eq!(row[1], Cell::Text("M".into()));
        assert_eq!(row[4], Cell::Integer(2000));
        assert_eq!(row[5], Cell::Float(11.0));
        let Cell::Float(estimated) = row[3] else {
            panic!("expected a float");
        };
        assert!((estimated - error_prob_to_qual(11.0 / 2000.0)).abs() < 1e-9);

        assert_eq!(report[2].rows().len(), 2);
        assert!(report[3].rows().is_empty());
    }

    #[test]
    fn rendering_is_stable() {
        let config = RecalibrationConfig::default();
        let tables = tables();
        let groups = ReadGroupDatabase::new();
        let inputs = ReportInputs {
            config: &config,
            tables: &tables,
            read_groups: &groups,
        };
        let first = render_report(&inputs).unwrap();
        let second = render_report(&inputs).unwrap();
        assert!(first.starts_with("#:GATKReport.v1.1:4\n"));
        assert!(first.contains("#:GATKTable:RecalTable1:"));
        assert_eq!(fingerprint(&first), fingerprint(&second));
        assert_eq!(fingerprint(&first).len(), 64);
    }
}
