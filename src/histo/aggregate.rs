use crate::classify::scenario::{classify, AssociatedPolicy, MergeScenario};
use crate::error::{CalibError, Result};
use crate::event::Event;
use crate::histo::bucket::{BucketId, BucketKey, BucketLayout, CategoryCuts, Tagger};
use crate::histo::hist::Hist1D;
use crate::kinematics::matching::JetAlgorithm;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Events per parallel accumulation chunk. Chunks are merged in order, so results do not depend
/// on the number of threads.
pub const ACCUMULATE_CHUNK: usize = 4096;

/// Sufficient statistics of one bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct BucketStats {
    pub sum_w: f64,
    pub sum_w2: f64,
    pub entries: u64,
    /// Probe-jet mass distribution of the bucket.
    pub mass: Hist1D,
}

impl BucketStats {
    fn empty(mass_edges: &[f64]) -> Result<Self> {
        Ok(Self {
            sum_w: 0.0,
            sum_w2: 0.0,
            entries: 0,
            mass: Hist1D::new(mass_edges.to_vec())?,
        })
    }

    fn add(&mut self, other: &BucketStats) -> Result<()> {
        self.sum_w += other.sum_w;
        self.sum_w2 += other.sum_w2;
        self.entries += other.entries;
        self.mass.merge(&other.mass)
    }

    pub fn error(&self) -> f64 {
        self.sum_w2.max(0.0).sqrt()
    }
}

/// Everything needed to turn an event into bucket increments.
#[derive(Debug, Clone)]
pub struct FillContext {
    pub algorithm: JetAlgorithm,
    pub policy: AssociatedPolicy,
    pub cuts: CategoryCuts,
    pub tagger: Tagger,
}

impl FillContext {
    pub fn validate(&self, layout: &BucketLayout) -> Result<()> {
        self.algorithm.validate()?;
        self.cuts.validate()?;
        if self.tagger.len() != layout.n_working_points() {
            return Err(CalibError::Configuration(format!(
                "tagger has {} working points but bucket layout has {}",
                self.tagger.len(),
                layout.n_working_points()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillOutcome {
    Filled { scenario: MergeScenario, buckets: usize },
    NoProbeJet,
    OutOfAcceptance,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillSummary {
    pub events: u64,
    pub no_probe_jet: u64,
    pub out_of_acceptance: u64,
    pub bucket_increments: u64,
    pub by_scenario: BTreeMap<MergeScenario, u64>,
}

impl FillSummary {
    fn record(&mut self, outcome: FillOutcome) {
        self.events += 1;
        match outcome {
            FillOutcome::Filled { scenario, buckets } => {
                *self.by_scenario.entry(scenario).or_insert(0) += 1;
                self.bucket_increments += buckets as u64;
            }
            FillOutcome::NoProbeJet => self.no_probe_jet += 1,
            FillOutcome::OutOfAcceptance => self.out_of_acceptance += 1,
        }
    }

    fn merge(&mut self, other: &FillSummary) {
        self.events += other.events;
        self.no_probe_jet += other.no_probe_jet;
        self.out_of_acceptance += other.out_of_acceptance;
        self.bucket_increments += other.bucket_increments;
        for (s, n) in &other.by_scenario {
            *self.by_scenario.entry(*s).or_insert(0) += n;
        }
    }
}

/// Dense bucket table allocated once from a layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregator {
    layout: BucketLayout,
    mass_edges: Vec<f64>,
    buckets: Vec<BucketStats>,
}

impl Aggregator {
    pub fn new(layout: BucketLayout, mass_edges: Vec<f64>) -> Result<Self> {
        let empty = BucketStats::empty(&mass_edges)?;
        let buckets = vec![empty; layout.len()];
        Ok(Self {
            layout,
            mass_edges,
            buckets,
        })
    }

    pub fn layout(&self) -> &BucketLayout {
        &self.layout
    }

    pub fn mass_edges(&self) -> &[f64] {
        &self.mass_edges
    }

    /// Add one weighted entry. Ids come from this aggregator's layout.
    pub fn fill(&mut self, id: BucketId, weight: f64, mass: f64) {
        let b = &mut self.buckets[id.index()];
        b.sum_w += weight;
        b.sum_w2 += weight * weight;
        b.entries += 1;
        b.mass.fill(mass, weight);
    }

    pub fn stats(&self, id: BucketId) -> &BucketStats {
        &self.buckets[id.index()]
    }

    pub(crate) fn stats_mut(&mut self, id: BucketId) -> &mut BucketStats {
        &mut self.buckets[id.index()]
    }

    /// Statistics for a key. An `All` scenario key sums the stored scenarios.
    pub fn get(&self, key: &BucketKey) -> Result<BucketStats> {
        if key.scenario == MergeScenario::All {
            return self.inclusive(key, &MergeScenario::CONCRETE);
        }
        let id = self.layout.id(key)?;
        Ok(self.buckets[id.index()].clone())
    }

    /// Sum over a set of scenarios with all other key fields fixed.
    pub fn inclusive(&self, key: &BucketKey, scenarios: &[MergeScenario]) -> Result<BucketStats> {
        let mut out = BucketStats::empty(&self.mass_edges)?;
        for &scenario in scenarios {
            if scenario == MergeScenario::All {
                return self.inclusive(key, &MergeScenario::CONCRETE);
            }
            let id = self.layout.id(&BucketKey { scenario, ..*key })?;
            out.add(&self.buckets[id.index()])?;
        }
        Ok(out)
    }

    pub fn iter(&self) -> impl Iterator<Item = (BucketKey, &BucketStats)> {
        self.layout
            .ids()
            .map(move |id| (self.layout.key(id), &self.buckets[id.index()]))
    }

    /// Classify the event's probe jet and fill one bucket per (category, working point).
    pub fn accumulate(&mut self, event: &Event, ctx: &FillContext) -> Result<FillOutcome> {
        if !event.weight.is_finite() {
            return Err(CalibError::DegenerateInput(format!(
                "non-finite event weight {}",
                event.weight
            )));
        }
        let Some(jet) = event.jet.as_ref() else {
            return Ok(FillOutcome::NoProbeJet);
        };
        let scenario = classify(jet, event.truth.as_ref(), &ctx.algorithm, ctx.policy)?;
        let Some(pt_bin) = self.layout.binning().locate(jet.p4.pt) else {
            return Ok(FillOutcome::OutOfAcceptance);
        };

        let mut filled = 0usize;
        for category in ctx.cuts.categories_of(jet) {
            for working_point in 0..ctx.tagger.len() {
                let pass = ctx.tagger.decide(jet, working_point).ok_or_else(|| {
                    CalibError::UnknownBucket(format!("working point {working_point} not in tagger"))
                })?;
                let id = self
                    .layout
                    .bucket_key(pt_bin, category, pass, working_point, scenario)?;
                self.fill(id, event.weight, jet.mass());
                filled += 1;
            }
        }
        Ok(FillOutcome::Filled {
            scenario,
            buckets: filled,
        })
    }

    /// Bucket-wise sum. Both sides must share layout and mass binning.
    pub fn merge(&mut self, other: &Aggregator) -> Result<()> {
        if self.layout != other.layout || self.mass_edges != other.mass_edges {
            return Err(CalibError::Configuration(
                "cannot merge aggregators with different layouts".to_string(),
            ));
        }
        for (a, b) in self.buckets.iter_mut().zip(&other.buckets) {
            a.add(b)?;
        }
        Ok(())
    }

    /// Accumulate all events: chunks in parallel, then an ordered merge.
    pub fn accumulate_all(&mut self, events: &[Event], ctx: &FillContext) -> Result<FillSummary> {
        ctx.validate(&self.layout)?;
        let template = Aggregator::new(self.layout.clone(), self.mass_edges.clone())?;

        let partials: Vec<Result<(Aggregator, FillSummary)>> = events
            .par_chunks(ACCUMULATE_CHUNK)
            .map(|chunk| {
                let mut agg = template.clone();
                let mut summary = FillSummary::default();
                for event in chunk {
                    let outcome = agg.accumulate(event, ctx)?;
                    summary.record(outcome);
                }
                Ok((agg, summary))
            })
            .collect();

        let mut summary = FillSummary::default();
        for partial in partials {
            let (agg, s) = partial?;
            self.merge(&agg)?;
            summary.merge(&s);
        }
        tracing::debug!(
            events = summary.events,
            increments = summary.bucket_increments,
            "accumulated event chunk set"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::truth::GenTruthSet;
    use crate::histo::bucket::{JetCategory, PassFail, PtBinning};
    use crate::kinematics::jet::ProbeJet;
    use crate::kinematics::vector::FourMomentum;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn ctx() -> FillContext {
        FillContext {
            algorithm: JetAlgorithm::ak8(),
            policy: AssociatedPolicy::MergeTable,
            cuts: CategoryCuts {
                mass_min: 105.0,
                mass_max: 210.0,
                btag_min: 0.5,
            },
            tagger: Tagger::new(vec![0.8, 0.65], None).unwrap(),
        }
    }

    fn aggregator() -> Aggregator {
        let binning = PtBinning::new(vec![300.0, 400.0, 480.0, 600.0]).unwrap();
        let layout = BucketLayout::new(binning, 2).unwrap();
        Aggregator::new(layout, vec![0.0, 100.0, 200.0, 300.0]).unwrap()
    }

    fn jet(pt: f64, mass: f64, tau32: f64, btag: f64) -> ProbeJet {
        ProbeJet {
            p4: FourMomentum::new(pt, 0.0, 0.0, mass),
            pt_raw: pt,
            subjets: Vec::new(),
            tau32,
            pair_mass: 0.0,
            subjet_fraction: 0.0,
            btag,
        }
    }

    fn merged_truth() -> GenTruthSet {
        let p = FourMomentum::massless(100.0, 0.1, 0.1);
        GenTruthSet::TopDecay { b: p, q1: p, q2: p }
    }

    #[test]
    fn fully_merged_event_touches_only_its_bucket() {
        let mut agg = aggregator();
        let ctx = ctx();
        // Mass outside the window and no b-tag: only the inclusive category.
        let event = Event {
            weight: 1.0,
            jet: Some(jet(350.0, 90.0, 0.5, 0.0)),
            truth: Some(merged_truth()),
        };
        let before = agg.clone();
        let outcome = agg.accumulate(&event, &ctx).unwrap();
        assert_eq!(
            outcome,
            FillOutcome::Filled {
                scenario: MergeScenario::FullyMerged,
                buckets: 2
            }
        );

        let pt_bin = agg.layout().binning().bin(0).unwrap();
        let key = BucketKey {
            pt_bin,
            category: JetCategory::Inclusive,
            working_point: 1,
            pass: PassFail::Pass,
            scenario: MergeScenario::FullyMerged,
        };
        let id = agg.layout().id(&key).unwrap();
        assert_eq!(agg.stats(id).sum_w - before.stats(id).sum_w, 1.0);

        for scenario in MergeScenario::CONCRETE {
            if scenario == MergeScenario::FullyMerged {
                continue;
            }
            let sibling = agg.layout().id(&BucketKey { scenario, ..key }).unwrap();
            assert_eq!(agg.stats(sibling), before.stats(sibling));
        }
        let fail = agg.layout().id(&BucketKey { pass: PassFail::Fail, ..key }).unwrap();
        assert_eq!(agg.stats(fail).sum_w, 0.0);
    }

    #[test]
    fn categories_replicate_but_pass_fail_partitions() {
        let mut agg = aggregator();
        let ctx = ctx();
        let event = Event {
            weight: 2.0,
            jet: Some(jet(420.0, 172.0, 0.7, 0.9)),
            truth: None,
        };
        agg.accumulate(&event, &ctx).unwrap();
        let pt_bin = agg.layout().binning().bin(1).unwrap();
        for category in JetCategory::ALL {
            for working_point in 0..2 {
                let pass = agg
                    .get(&BucketKey {
                        pt_bin,
                        category,
                        working_point,
                        pass: PassFail::Pass,
                        scenario: MergeScenario::Background,
                    })
                    .unwrap();
                let fail = agg
                    .get(&BucketKey {
                        pt_bin,
                        category,
                        working_point,
                        pass: PassFail::Fail,
                        scenario: MergeScenario::Background,
                    })
                    .unwrap();
                assert_eq!(pass.sum_w + fail.sum_w, 2.0);
                // tau32 = 0.7 passes the 0.8 cut only.
                assert_eq!(pass.sum_w, if working_point == 0 { 2.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn all_scenario_is_the_sum() {
        let mut agg = aggregator();
        let ctx = ctx();
        for (w, truth) in [(1.0, Some(merged_truth())), (0.5, None), (-0.25, None)] {
            let e = Event {
                weight: w,
                jet: Some(jet(350.0, 172.0, 0.5, 0.0)),
                truth,
            };
            agg.accumulate(&e, &ctx).unwrap();
        }
        let key = BucketKey {
            pt_bin: agg.layout().binning().bin(0).unwrap(),
            category: JetCategory::MassWindow,
            working_point: 0,
            pass: PassFail::Pass,
            scenario: MergeScenario::All,
        };
        let all = agg.get(&key).unwrap();
        assert_relative_eq!(all.sum_w, 1.25);
        assert_relative_eq!(all.sum_w2, 1.0 + 0.25 + 0.0625);
        assert_eq!(all.entries, 3);
        assert_relative_eq!(all.mass.sum_w[1], 1.25);
    }

    #[test]
    fn events_without_jet_or_outside_bins_are_skipped() {
        let mut agg = aggregator();
        let ctx = ctx();
        let before = agg.clone();
        let none = Event { weight: 1.0, jet: None, truth: None };
        assert_eq!(agg.accumulate(&none, &ctx).unwrap(), FillOutcome::NoProbeJet);
        let low = Event { weight: 1.0, jet: Some(jet(250.0, 172.0, 0.5, 0.0)), truth: None };
        assert_eq!(agg.accumulate(&low, &ctx).unwrap(), FillOutcome::OutOfAcceptance);
        assert_eq!(agg, before);
    }

    #[test]
    fn non_finite_weight_aborts_before_filling() {
        let mut agg = aggregator();
        let ctx = ctx();
        let before = agg.clone();
        for weight in [f64::NAN, f64::INFINITY] {
            let event = Event {
                weight,
                jet: Some(jet(350.0, 172.0, 0.5, 0.0)),
                truth: None,
            };
            assert!(matches!(
                agg.accumulate(&event, &ctx),
                Err(CalibError::DegenerateInput(_))
            ));
        }
        assert_eq!(agg, before);

        let events = vec![
            Event { weight: 1.0, jet: Some(jet(350.0, 172.0, 0.5, 0.0)), truth: None },
            Event { weight: f64::NAN, jet: None, truth: None },
        ];
        assert!(agg.accumulate_all(&events, &ctx).is_err());
    }

    #[test]
    fn accumulation_is_order_independent() {
        let ctx = ctx();
        let mut rng = StdRng::seed_from_u64(7);
        let mut events: Vec<Event> = (0..500)
            .map(|i| Event {
                weight: rng.gen_range(-0.5..2.0),
                jet: Some(jet(
                    rng.gen_range(300.0..600.0),
                    rng.gen_range(50.0..250.0),
                    rng.gen_range(0.3..1.0),
                    rng.gen_range(0.0..1.0),
                )),
                truth: if i % 3 == 0 { Some(merged_truth()) } else { None },
            })
            .collect();

        let mut reference = aggregator();
        reference.accumulate_all(&events, &ctx).unwrap();

        for _ in 0..3 {
            events.shuffle(&mut rng);
            let mut agg = aggregator();
            let mut summary = FillSummary::default();
            for e in &events {
                summary.record(agg.accumulate(e, &ctx).unwrap());
            }
            assert_eq!(summary.events, 500);
            for ((ka, a), (kb, b)) in agg.iter().zip(reference.iter()) {
                assert_eq!(ka, kb);
                assert_eq!(a.entries, b.entries);
                assert_relative_eq!(a.sum_w, b.sum_w, epsilon = 1e-9);
                assert_relative_eq!(a.sum_w2, b.sum_w2, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn parallel_matches_serial() {
        let ctx = ctx();
        let events: Vec<Event> = (0..(ACCUMULATE_CHUNK + 17))
            .map(|i| Event {
                weight: 1.0 + (i % 5) as f64,
                jet: Some(jet(310.0 + (i % 280) as f64, 172.0, 0.6, 0.0)),
                truth: None,
            })
            .collect();
        let mut parallel = aggregator();
        let summary = parallel.accumulate_all(&events, &ctx).unwrap();
        assert_eq!(summary.events, events.len() as u64);

        let mut serial = aggregator();
        for e in &events {
            serial.accumulate(e, &ctx).unwrap();
        }
        for ((_, a), (_, b)) in parallel.iter().zip(serial.iter()) {
            assert_relative_eq!(a.sum_w, b.sum_w, epsilon = 1e-9);
            assert_eq!(a.entries, b.entries);
        }
    }

    #[test]
    fn mismatched_tagger_is_a_configuration_error() {
        let mut agg = aggregator();
        let mut ctx = ctx();
        ctx.tagger = Tagger::new(vec![0.5], None).unwrap();
        let err = agg.accumulate_all(&[], &ctx).unwrap_err();
        assert!(matches!(err, CalibError::Configuration(_)));
    }
}
