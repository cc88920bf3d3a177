//! Aggregation over a single column, optionally grouped by another.
//!
//! The operator drains its child on `open` into an accumulator keyed by the
//! group value, then iterates the per-group results. Two accumulator
//! variants exist: integers support the full operator set, strings only
//! COUNT; the variant is chosen from the aggregate column's type when the
//! operator is built.

use crate::errors::ExecutionError;
use crate::executor::{OpIterator, TupleIterator};
use std::collections::HashMap;
use substrate::tuple::Tuple;
use substrate::types::{Field, TupleDesc, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl AggregateOp {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Sum => "sum",
            AggregateOp::Avg => "avg",
            AggregateOp::Count => "count",
        }
    }
}

/// The two accumulator variants behind one merge/iterate surface.
pub enum Aggregator {
    Int(IntegerAggregator),
    Str(StringAggregator),
}

impl Aggregator {
    /// Picks the variant matching the aggregate column's type.
    pub fn for_type(
        field_type: Type,
        gfield: Option<usize>,
        gb_type: Option<Type>,
        afield: usize,
        op: AggregateOp,
    ) -> Result<Aggregator, ExecutionError> {
        match field_type {
            Type::Int => Ok(Aggregator::Int(IntegerAggregator::new(
                gfield, gb_type, afield, op,
            ))),
            Type::Str => Ok(Aggregator::Str(StringAggregator::new(
                gfield, gb_type, afield, op,
            )?)),
        }
    }

    pub fn merge(&mut self, tuple: &Tuple) -> Result<(), ExecutionError> {
        match self {
            Aggregator::Int(agg) => agg.merge(tuple),
            Aggregator::Str(agg) => agg.merge(tuple),
        }
    }

    pub fn iterator(&self) -> TupleIterator {
        match self {
            Aggregator::Int(agg) => agg.iterator(),
            Aggregator::Str(agg) => agg.iterator(),
        }
    }
}

/// Computes MIN/MAX/SUM/AVG/COUNT over integer fields, one accumulator and
/// one merge count per group.
pub struct IntegerAggregator {
    gfield: Option<usize>,
    gb_type: Option<Type>,
    afield: usize,
    op: AggregateOp,
    aggregates: HashMap<Option<Field>, i32>,
    counts: HashMap<Option<Field>, i32>,
}

impl IntegerAggregator {
    pub fn new(
        gfield: Option<usize>,
        gb_type: Option<Type>,
        afield: usize,
        op: AggregateOp,
    ) -> IntegerAggregator {
        IntegerAggregator {
            gfield,
            gb_type,
            afield,
            op,
            aggregates: HashMap::new(),
            counts: HashMap::new(),
        }
    }

    pub fn merge(&mut self, tuple: &Tuple) -> Result<(), ExecutionError> {
        let group = self.gfield.map(|g| tuple.field(g).clone());
        let Field::Int(value) = *tuple.field(self.afield) else {
            return Err(ExecutionError::TypeMismatch(
                "integer aggregate over a non-integer field",
            ));
        };

        // MIN and MAX start from the opposite extreme so the first real
        // value always wins.
        let initial = match self.op {
            AggregateOp::Min => i32::MAX,
            AggregateOp::Max => i32::MIN,
            _ => 0,
        };
        let acc = self.aggregates.entry(group.clone()).or_insert(initial);
        match self.op {
            AggregateOp::Count => *acc += 1,
            AggregateOp::Sum | AggregateOp::Avg => *acc += value,
            AggregateOp::Min => *acc = (*acc).min(value),
            AggregateOp::Max => *acc = (*acc).max(value),
        }
        *self.counts.entry(group).or_insert(0) += 1;
        Ok(())
    }

    fn final_value(&self, group: &Option<Field>) -> Option<i32> {
        let acc = *self.aggregates.get(group)?;
        match self.op {
            AggregateOp::Avg => Some(acc / self.counts.get(group).copied().unwrap_or(1)),
            _ => Some(acc),
        }
    }

    /// One result tuple per group: `(group, value)` when grouping,
    /// `(value)` otherwise. With no input at all, COUNT and SUM still
    /// produce their zero; MIN/MAX/AVG produce nothing.
    pub fn iterator(&self) -> TupleIterator {
        match self.gfield {
            None => {
                let td = TupleDesc::unnamed(vec![Type::Int]);
                let value = self.final_value(&None).or(match self.op {
                    AggregateOp::Count | AggregateOp::Sum => Some(0),
                    _ => None,
                });
                let tuples = value
                    .map(|v| {
                        let mut t = Tuple::new(td.clone());
                        t.set_field(0, Field::Int(v));
                        vec![t]
                    })
                    .unwrap_or_default();
                TupleIterator::new(td, tuples)
            }
            Some(_) => {
                let gb_type = self.gb_type.unwrap_or(Type::Int);
                let td = TupleDesc::unnamed(vec![gb_type, Type::Int]);
                let tuples = self
                    .aggregates
                    .keys()
                    .filter_map(|group| {
                        let value = self.final_value(group)?;
                        let mut t = Tuple::new(td.clone());
                        t.set_field(0, group.clone()?);
                        t.set_field(1, Field::Int(value));
                        Some(t)
                    })
                    .collect();
                TupleIterator::new(td, tuples)
            }
        }
    }
}

/// Counts string fields per group. COUNT is the only operator strings
/// support; anything else is rejected when the aggregator is built.
pub struct StringAggregator {
    gfield: Option<usize>,
    gb_type: Option<Type>,
    afield: usize,
    counts: HashMap<Option<Field>, i32>,
}

impl StringAggregator {
    pub fn new(
        gfield: Option<usize>,
        gb_type: Option<Type>,
        afield: usize,
        op: AggregateOp,
    ) -> Result<StringAggregator, ExecutionError> {
        if op != AggregateOp::Count {
            return Err(ExecutionError::Unsupported(
                "string aggregates support only count",
            ));
        }
        Ok(StringAggregator {
            gfield,
            gb_type,
            afield,
            counts: HashMap::new(),
        })
    }

    pub fn merge(&mut self, tuple: &Tuple) -> Result<(), ExecutionError> {
        if !matches!(tuple.field(self.afield), Field::Str(_)) {
            return Err(ExecutionError::TypeMismatch(
                "string aggregate over a non-string field",
            ));
        }
        let group = self.gfield.map(|g| tuple.field(g).clone());
        *self.counts.entry(group).or_insert(0) += 1;
        Ok(())
    }

    pub fn iterator(&self) -> TupleIterator {
        match self.gfield {
            None => {
                let td = TupleDesc::unnamed(vec![Type::Int]);
                let count = self.counts.get(&None).copied().unwrap_or(0);
                let mut t = Tuple::new(td.clone());
                t.set_field(0, Field::Int(count));
                TupleIterator::new(td, vec![t])
            }
            Some(_) => {
                let gb_type = self.gb_type.unwrap_or(Type::Str);
                let td = TupleDesc::unnamed(vec![gb_type, Type::Int]);
                let tuples = self
                    .counts
                    .iter()
                    .filter_map(|(group, &count)| {
                        let mut t = Tuple::new(td.clone());
                        t.set_field(0, group.clone()?);
                        t.set_field(1, Field::Int(count));
                        Some(t)
                    })
                    .collect();
                TupleIterator::new(td, tuples)
            }
        }
    }
}

/// The aggregation operator: computes one aggregate column over a child,
/// grouped by at most one other column.
pub struct Aggregate<'a> {
    child: Box<dyn OpIterator + 'a>,
    afield: usize,
    gfield: Option<usize>,
    op: AggregateOp,
    td: TupleDesc,
    results: Option<TupleIterator>,
}

impl<'a> std::fmt::Debug for Aggregate<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregate")
            .field("afield", &self.afield)
            .field("gfield", &self.gfield)
            .field("op", &self.op)
            .field("td", &self.td)
            .finish()
    }
}

impl<'a> Aggregate<'a> {
    /// Builds the operator and fixes its output schema. The aggregate
    /// column is named `op(child_name)`; a grouped aggregate keeps the
    /// group column's child name in front.
    pub fn new(
        child: Box<dyn OpIterator + 'a>,
        afield: usize,
        gfield: Option<usize>,
        op: AggregateOp,
    ) -> Result<Aggregate<'a>, ExecutionError> {
        let child_td = child.tuple_desc();
        if child_td.field_type(afield) == Type::Str && op != AggregateOp::Count {
            return Err(ExecutionError::Unsupported(
                "string aggregates support only count",
            ));
        }

        let agg_name = format!(
            "{}({})",
            op.name(),
            child_td.field_name(afield).unwrap_or("null")
        );
        let td = match gfield {
            None => TupleDesc::new(vec![Type::Int], vec![Some(agg_name)]),
            Some(g) => TupleDesc::new(
                vec![child_td.field_type(g), Type::Int],
                vec![child_td.field_name(g).map(String::from), Some(agg_name)],
            ),
        };

        Ok(Aggregate {
            child,
            afield,
            gfield,
            op,
            td,
            results: None,
        })
    }

    pub fn aggregate_op(&self) -> AggregateOp {
        self.op
    }

    fn build_aggregator(&self) -> Result<Aggregator, ExecutionError> {
        let child_td = self.child.tuple_desc();
        let gb_type = self.gfield.map(|g| child_td.field_type(g));
        Aggregator::for_type(
            child_td.field_type(self.afield),
            self.gfield,
            gb_type,
            self.afield,
            self.op,
        )
    }
}

impl OpIterator for Aggregate<'_> {
    fn open(&mut self) -> Result<(), ExecutionError> {
        let mut aggregator = self.build_aggregator()?;
        self.child.open()?;
        let mut merged = 0usize;
        while self.child.has_next()? {
            aggregator.merge(&self.child.next()?)?;
            merged += 1;
        }
        crate::granite_debug_log!("[Aggregate::open] merged {merged} child tuples");

        let mut results = aggregator.iterator();
        results.open()?;
        self.results = Some(results);
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool, ExecutionError> {
        self.results
            .as_mut()
            .ok_or(ExecutionError::IllegalState("aggregate not open"))?
            .has_next()
    }

    fn next(&mut self) -> Result<Tuple, ExecutionError> {
        self.results
            .as_mut()
            .ok_or(ExecutionError::IllegalState("aggregate not open"))?
            .next()
    }

    fn rewind(&mut self) -> Result<(), ExecutionError> {
        self.results
            .as_mut()
            .ok_or(ExecutionError::IllegalState("aggregate not open"))?
            .rewind()
    }

    fn close(&mut self) {
        self.child.close();
        if let Some(mut results) = self.results.take() {
            results.close();
        }
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.td
    }
}
