//! Query entry points over a columnar table.

use crate::aggregate::{aggregate, AggPlan, AggSpec};
use crate::cache;
use crate::error::{QueryError, QueryResult};
use crate::expr::{self, Evaluated};
use crate::factorize::Factorization;
use crate::filter::{self, Term};
use crate::group_index::GroupIndex;
use crate::rows::{self, Predicate, RowIter};
use colgroup_columnar::{BitVec, ColumnarTable, TableOptions};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// Chunking and chunk cache of group-by output tables.
    pub output: TableOptions,
    /// Upper bound on the product of group-by column cardinalities.
    pub max_group_space: u64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            output: TableOptions::default(),
            max_group_space: i64::MAX as u64,
        }
    }
}

/// Entry points for group-by, filtering and factor caching over a [`ColumnarTable`].
#[derive(Debug, Clone, Default)]
pub struct QueryEngine {
    options: QueryOptions,
}

impl QueryEngine {
    pub fn new(options: QueryOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// Factorizations of `cols`, taken from the factor cache where one exists.
    pub fn factorize_groupby_cols(
        &self,
        table: &ColumnarTable,
        cols: &[&str],
    ) -> QueryResult<Vec<Factorization>> {
        cols.iter()
            .map(|col| cache::load_or_factorize(table, col))
            .collect()
    }

    /// Persist factorizations of `cols` next to the table's columns. Existing entries are reused
    /// unless `refresh` is set.
    pub fn build_factor_cache(
        &self,
        table: &ColumnarTable,
        cols: &[&str],
        refresh: bool,
    ) -> QueryResult<Vec<Factorization>> {
        if table.rootdir().is_none() {
            return Err(QueryError::UnsupportedOperation(
                "caching requires an addressable table".into(),
            ));
        }
        cols.iter()
            .map(|col| cache::get_or_build(table, col, refresh))
            .collect()
    }

    /// Group `table` by `groupby_cols` and aggregate `aggs` per group, considering only rows
    /// whose `filter` bit is set. The result is persisted at `output_location` when given.
    pub fn group_by(
        &self,
        table: &ColumnarTable,
        groupby_cols: &[&str],
        aggs: &[AggSpec],
        filter: Option<&BitVec>,
        output_location: Option<&Path>,
    ) -> QueryResult<ColumnarTable> {
        let plan = AggPlan::new(table, groupby_cols, aggs)?;
        let factors = self.factorize_groupby_cols(table, groupby_cols)?;
        let index = GroupIndex::build(
            factors,
            table.row_count(),
            table.chunk_len(),
            filter,
            self.options.max_group_space,
        )?;
        aggregate(table, &index, &plan, self.options.output, output_location)
    }

    pub fn where_terms(&self, table: &ColumnarTable, terms: &[Term]) -> QueryResult<BitVec> {
        filter::where_terms(table, terms)
    }

    pub fn where_rows<'a>(
        &self,
        table: &'a ColumnarTable,
        predicate: impl Into<Predicate>,
        outcols: Option<&[&str]>,
        limit: Option<usize>,
        skip: usize,
    ) -> QueryResult<RowIter<'a>> {
        rows::where_rows(table, predicate.into(), outcols, limit, skip)
    }

    pub fn eval(&self, table: &ColumnarTable, expression: &str) -> QueryResult<Evaluated> {
        expr::evaluate(table, &expr::parse(expression)?)
    }
}
