//! Mini-batch iteration over any [`CountyDataset`].

use chrono::NaiveDate;
use ndarray::{stack, Array2, Array3, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use countycast_core::{CountyFips, PipelineError, PipelineResult};

use crate::dataset::{CountyDataset, CountySample};

/// Collated samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// `(county, target_date)` of each row.
    pub keys: Vec<(CountyFips, NaiveDate)>,
    /// `[batch, history_days, dynamic features]`
    pub history: Array3<f64>,
    /// `[batch, static features]`
    pub statics: Array2<f64>,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn collate(samples: &[CountySample]) -> PipelineResult<Self> {
        let histories: Vec<ArrayView2<f64>> = samples.iter().map(|s| s.history.view()).collect();
        let statics: Vec<ArrayView1<f64>> = samples.iter().map(|s| s.statics.view()).collect();
        Ok(Self {
            keys: samples
                .iter()
                .map(|s| (s.county.clone(), s.target_date))
                .collect(),
            history: stack(Axis(0), &histories)
                .map_err(|err| PipelineError::Shape(format!("collating histories: {err}")))?,
            statics: stack(Axis(0), &statics)
                .map_err(|err| PipelineError::Shape(format!("collating static features: {err}")))?,
            labels: samples.iter().map(|s| s.label).collect(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct BatchLoader<'a, D: CountyDataset> {
    dataset: &'a D,
    batch_size: usize,
    seed: Option<u64>,
    drop_last: bool,
}

impl<'a, D: CountyDataset> BatchLoader<'a, D> {
    pub fn new(dataset: &'a D, batch_size: usize) -> PipelineResult<Self> {
        if batch_size == 0 {
            return Err(PipelineError::Config("batch_size must be at least 1".into()));
        }
        Ok(Self {
            dataset,
            batch_size,
            seed: None,
            drop_last: false,
        })
    }

    /// Shuffle sample order each epoch, reproducibly from `seed`.
    pub fn shuffled(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn drop_last(mut self, drop_last: bool) -> Self {
        self.drop_last = drop_last;
        self
    }

    pub fn num_batches(&self) -> usize {
        let len = self.dataset.len();
        if self.drop_last {
            len / self.batch_size
        } else {
            len.div_ceil(self.batch_size)
        }
    }

    /// Sample order for `epoch`.
    fn order(&self, epoch: u64) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.seed {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch));
            order.shuffle(&mut rng);
        }
        order
    }

    pub fn epoch(&self, epoch: u64) -> Batches<'_, 'a, D> {
        Batches {
            loader: self,
            order: self.order(epoch),
            cursor: 0,
        }
    }

    pub fn iter(&self) -> Batches<'_, 'a, D> {
        self.epoch(0)
    }
}

pub struct Batches<'l, 'a, D: CountyDataset> {
    loader: &'l BatchLoader<'a, D>,
    order: Vec<usize>,
    cursor: usize,
}

impl<D: CountyDataset> Iterator for Batches<'_, '_, D> {
    type Item = PipelineResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.order.len() - self.cursor;
        let take = remaining.min(self.loader.batch_size);
        if take == 0 || (self.loader.drop_last && take < self.loader.batch_size) {
            return None;
        }
        let indices = &self.order[self.cursor..self.cursor + take];
        self.cursor += take;
        let samples: PipelineResult<Vec<CountySample>> = indices
            .iter()
            .map(|&idx| self.loader.dataset.get(idx))
            .collect();
        Some(samples.and_then(|samples| Batch::collate(&samples)))
    }
}
