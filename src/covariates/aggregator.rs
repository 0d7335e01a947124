use tracing::debug;

use super::quality::qual_to_error_prob;
use super::schema::{CovariateKey, SchemaError};
use super::table::{EmpiricalTable, EmpiricalValue};
use super::values::{read_contexts, read_cycles, EventType};
use super::CovariateChain;
use crate::exec::Parallelism;
use crate::genomics::ReadBatch;
use crate::options::CovariateOptions;
use crate::pipeline::{ActiveLocationList, FractionalErrors, PipelineStatistics, Stage, StageTimer};

/// Persistent tables, one per [`CovariateChain`].
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateTables {
    tables: [EmpiricalTable; 3],
}

impl Default for CovariateTables {
    fn default() -> Self {
        Self::new()
    }
}

impl CovariateTables {
    /// Empty tables.
    pub fn new() -> Self {
        Self {
            tables: CovariateChain::ALL.map(|chain| EmpiricalTable::new(chain.schema())),
        }
    }

    fn index(chain: CovariateChain) -> usize {
        match chain {
            CovariateChain::QualityScore => 0,
            CovariateChain::Context => 1,
            CovariateChain::Cycle => 2,
        }
    }

    /// Table of `chain`.
    pub fn table(&self, chain: CovariateChain) -> &EmpiricalTable {
        &self.tables[Self::index(chain)]
    }

    /// Mutable table of `chain`.
    pub fn table_mut(&mut self, chain: CovariateChain) -> &mut EmpiricalTable {
        &mut self.tables[Self::index(chain)]
    }

    /// Add every entry of `other`.
    pub fn merge(&mut self, other: &CovariateTables) {
        for chain in CovariateChain::ALL {
            self.table_mut(chain).merge_table(other.table(chain));
        }
    }

    /// Whether no observation was recorded.
    pub fn is_empty(&self) -> bool {
        self.tables.iter().all(EmpiricalTable::is_empty)
    }
}

/// Borrowed per-batch state the aggregator reads.
#[derive(Debug, Clone, Copy)]
pub struct CovariateInputs<'a> {
    /// Current batch.
    pub batch: &'a ReadBatch,
    /// Reads that survived filtering.
    pub active: &'a [u32],
    /// Per-base activity.
    pub locations: &'a ActiveLocationList,
    /// Per-base fractional errors.
    pub errors: &'a FractionalErrors,
    /// Covariate settings.
    pub options: &'a CovariateOptions,
}

fn event_quality(options: &CovariateOptions, event: EventType, reported: u8) -> u8 {
    match event {
        EventType::Mismatch => reported,
        EventType::Insertion => options.insertion_quality,
        EventType::Deletion => options.deletion_quality,
    }
}

/// Append the observations of `read` for `chain` to `out`.
fn emit_read(
    chain: CovariateChain,
    inputs: &CovariateInputs<'_>,
    read: usize,
    out: &mut Vec<(CovariateKey, EmpiricalValue)>,
) -> Result<(), SchemaError> {
    let batch = inputs.batch;
    let options = inputs.options;
    let range = batch.base_range(read);
    if inputs.locations.count_active(range.clone()) == 0 {
        return Ok(());
    }
    let read_group = batch.read_groups()[read];
    let quals = batch.read_qualities(read);
    let schema = chain.schema();

    // Per-event covariate of this chain; `None` entries skip the base.
    let mut covariates: [Vec<Option<u32>>; 3] = Default::default();
    match chain {
        CovariateChain::QualityScore => {}
        CovariateChain::Context => {
            let bases = batch.read_bases(read);
            let reverse = batch.is_reverse(read);
            let mismatch = read_contexts(
                bases,
                quals,
                reverse,
                options.mismatch_context_size,
                options.low_quality_tail,
            );
            let indel = if options.indel_context_size == options.mismatch_context_size {
                mismatch.clone()
            } else {
                read_contexts(
                    bases,
                    quals,
                    reverse,
                    options.indel_context_size,
                    options.low_quality_tail,
                )
            };
            covariates = [mismatch, indel.clone(), indel];
        }
        CovariateChain::Cycle => {
            let cycles = read_cycles(
                range.len(),
                batch.is_reverse(read),
                batch.is_second_of_pair(read),
                options.maximum_cycle,
            );
            covariates = [cycles.substitution, cycles.indel.clone(), cycles.indel];
        }
    }

    for (offset, base) in range.enumerate() {
        if !inputs.locations.is_active(base) {
            continue;
        }
        for event in EventType::ALL {
            let quality = event_quality(options, event, quals[offset]);
            let key = match chain {
                CovariateChain::QualityScore => {
                    schema.encode(&[read_group, u32::from(quality), event.code()])?
                }
                _ => match covariates[event.index()][offset] {
                    Some(value) => {
                        schema.encode(&[read_group, u32::from(quality), value, event.code()])?
                    }
                    None => continue,
                },
            };
            let value = EmpiricalValue::observation(
                inputs.errors.get(base, event),
                qual_to_error_prob(f64::from(quality)),
            );
            out.push((key, value));
        }
    }
    Ok(())
}

/// Emit, sort, reduce and merge one batch into `tables`.
///
/// Chains are processed one after another so only one chain's pairs are
/// held at a time.
pub fn accumulate_batch<E: Parallelism>(
    exec: &E,
    inputs: &CovariateInputs<'_>,
    tables: &mut CovariateTables,
    stats: &mut PipelineStatistics,
) -> Result<(), SchemaError> {
    let timer = StageTimer::start(Stage::Covariates);
    stats.active_bases += inputs.locations.count_all() as u64;

    for chain in CovariateChain::ALL {
        let per_read = exec.map(inputs.active, |&read| {
            let mut pairs = Vec::new();
            emit_read(chain, inputs, read as usize, &mut pairs).map(|()| pairs)
        });
        let total = per_read
            .iter()
            .map(|r| r.as_ref().map_or(0, Vec::len))
            .sum();
        let mut pairs = Vec::with_capacity(total);
        for read_pairs in per_read {
            pairs.extend(read_pairs?);
        }

        exec.sort_by_key(&mut pairs);
        let reduced = exec.reduce_by_key(&pairs, EmpiricalValue::combine);
        debug!(
            table = chain.name(),
            emitted = pairs.len(),
            keys = reduced.len(),
            "covariate table batch"
        );
        tables.table_mut(chain).merge_sorted(&reduced);
    }

    timer.stop(stats);
    Ok(())
}
