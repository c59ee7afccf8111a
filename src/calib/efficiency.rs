use crate::calib::curve::{Curve, GraphPoint};
use crate::calib::scan::EfficiencyCurveSet;
use crate::calib::sf::ratio_with_uncertainty;
use crate::classify::scenario::MergeScenario;
use crate::error::{CalibError, Result};
use crate::histo::aggregate::Aggregator;
use crate::histo::bucket::{BucketKey, JetCategory, PassFail, PtBin, Tagger};

/// Which buckets form numerator and denominator of one efficiency curve.
#[derive(Debug, Clone, Copy)]
pub struct EfficiencySelection<'a> {
    pub pt_bin: PtBin,
    /// Category of the denominator (all jets, pass and fail).
    pub category: JetCategory,
    /// Category of the numerator (passing jets); equal to `category` or a tighter one.
    pub numerator_category: JetCategory,
    pub scenarios: &'a [MergeScenario],
}

/// Efficiency per working point, x = threshold, loosest first.
///
/// The numerator is a subset of the denominator, so the correlated ratio uncertainty applies.
/// Empty denominators give NaN points.
pub fn efficiency_curve(
    agg: &Aggregator,
    tagger: &Tagger,
    sel: &EfficiencySelection<'_>,
    name: impl Into<String>,
) -> Result<Curve> {
    if tagger.len() != agg.layout().n_working_points() {
        return Err(CalibError::Configuration(format!(
            "tagger has {} working points but bucket table has {}",
            tagger.len(),
            agg.layout().n_working_points()
        )));
    }
    let mut points = Vec::with_capacity(tagger.len());
    for (working_point, &threshold) in tagger.thresholds().iter().enumerate() {
        let key = |category, pass| BucketKey {
            pt_bin: sel.pt_bin,
            category,
            working_point,
            pass,
            scenario: MergeScenario::All,
        };
        let pass = agg.inclusive(&key(sel.numerator_category, PassFail::Pass), sel.scenarios)?;
        let den_pass = agg.inclusive(&key(sel.category, PassFail::Pass), sel.scenarios)?;
        let den_fail = agg.inclusive(&key(sel.category, PassFail::Fail), sel.scenarios)?;
        let total_w = den_pass.sum_w + den_fail.sum_w;
        let total_err = (den_pass.sum_w2 + den_fail.sum_w2).max(0.0).sqrt();

        let point = if pass.sum_w == 0.0 && total_w != 0.0 {
            GraphPoint::new(threshold, 0.0)
        } else {
            match ratio_with_uncertainty(pass.sum_w, total_w, pass.error(), total_err) {
                Some((eff, err)) => GraphPoint::new(threshold, eff).with_y_errors(err, err),
                None => GraphPoint::new(threshold, f64::NAN),
            }
        };
        points.push(point);
    }
    Ok(Curve::new(name, points))
}

fn selection(
    pt_bin: PtBin,
    category: JetCategory,
    numerator_category: JetCategory,
    scenarios: &[MergeScenario],
) -> EfficiencySelection<'_> {
    EfficiencySelection {
        pt_bin,
        category,
        numerator_category,
        scenarios,
    }
}

/// One curve set per pt bin: background efficiency as reference, signal and b-tagged
/// efficiencies as companions.
pub fn build_curve_sets(
    signal: &Aggregator,
    background: &Aggregator,
    tagger: &Tagger,
    category: JetCategory,
    signal_scenarios: &[MergeScenario],
) -> Result<Vec<EfficiencyCurveSet>> {
    if signal.layout() != background.layout() {
        return Err(CalibError::Configuration(
            "signal and background bucket tables use different layouts".to_string(),
        ));
    }
    let background_scenarios = [MergeScenario::All];
    let binning = background.layout().binning();

    let mut sets = Vec::with_capacity(binning.len());
    for pt_bin in binning.bins() {
        let label = format!("{}/{}", category, binning.range(pt_bin).label());
        let tagged = category.with_btag();

        let bkg = efficiency_curve(
            background,
            tagger,
            &selection(pt_bin, category, category, &background_scenarios),
            format!("eff/background/{label}"),
        )?;
        let sig = efficiency_curve(
            signal,
            tagger,
            &selection(pt_bin, category, category, signal_scenarios),
            format!("eff/signal/{label}"),
        )?;
        let bkg_tagged = efficiency_curve(
            background,
            tagger,
            &selection(pt_bin, category, tagged, &background_scenarios),
            format!("eff/background_btag/{label}"),
        )?;
        let sig_tagged = efficiency_curve(
            signal,
            tagger,
            &selection(pt_bin, category, tagged, signal_scenarios),
            format!("eff/signal_btag/{label}"),
        )?;
        sets.push(EfficiencyCurveSet::new(
            label,
            bkg,
            Some(sig),
            Some(bkg_tagged),
            Some(sig_tagged),
        )?);
    }
    Ok(sets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calib::scan::scan_working_point;
    use crate::classify::scenario::AssociatedPolicy;
    use crate::event::Event;
    use crate::histo::aggregate::FillContext;
    use crate::histo::bucket::{BucketLayout, CategoryCuts, PtBinning};
    use crate::kinematics::jet::ProbeJet;
    use crate::kinematics::matching::JetAlgorithm;
    use crate::kinematics::vector::FourMomentum;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    fn tagger() -> Tagger {
        Tagger::new(vec![0.9, 0.7, 0.5, 0.3], None).unwrap()
    }

    fn ctx() -> FillContext {
        FillContext {
            algorithm: JetAlgorithm::ak8(),
            policy: AssociatedPolicy::MergeTable,
            cuts: CategoryCuts {
                mass_min: 105.0,
                mass_max: 210.0,
                btag_min: 0.5,
            },
            tagger: tagger(),
        }
    }

    fn aggregator() -> Aggregator {
        let layout = BucketLayout::new(PtBinning::new(vec![300.0, 400.0, 500.0]).unwrap(), 4).unwrap();
        Aggregator::new(layout, vec![0.0, 500.0]).unwrap()
    }

    fn event(pt: f64, tau32: f64, btag: f64) -> Event {
        Event {
            weight: 1.0,
            jet: Some(ProbeJet {
                p4: FourMomentum::new(pt, 0.0, 0.0, 170.0),
                pt_raw: pt,
                subjets: Vec::new(),
                tau32,
                pair_mass: 0.0,
                subjet_fraction: 0.0,
                btag,
            }),
            truth: None,
        }
    }

    #[test]
    fn efficiency_follows_tau32_distribution() {
        let mut agg = aggregator();
        let ctx = ctx();
        for &t in &[0.2, 0.4, 0.6, 0.8, 0.95] {
            agg.accumulate(&event(350.0, t, 0.0), &ctx).unwrap();
        }
        let sel = EfficiencySelection {
            pt_bin: agg.layout().binning().bin(0).unwrap(),
            category: JetCategory::Inclusive,
            numerator_category: JetCategory::Inclusive,
            scenarios: &[MergeScenario::All],
        };
        let curve = efficiency_curve(&agg, &tagger(), &sel, "bkg").unwrap();
        let effs: Vec<f64> = curve.ys().collect();
        assert_eq!(effs, vec![0.8, 0.6, 0.4, 0.2]);
        let xs: Vec<f64> = curve.points.iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![0.9, 0.7, 0.5, 0.3]);
        // Unit weights: binomial-like error from the subset formula.
        let p = curve.points[1];
        let expected = 0.6 * (3.0f64 / 9.0 + 5.0 / 25.0 - 2.0 * 3.0 / 15.0).sqrt();
        assert_relative_eq!(p.eyh, expected, epsilon = 1e-12);

        let empty = EfficiencySelection {
            pt_bin: agg.layout().binning().bin(1).unwrap(),
            ..sel
        };
        let curve = efficiency_curve(&agg, &tagger(), &empty, "empty").unwrap();
        assert!(curve.ys().all(f64::is_nan));
    }

    #[test]
    fn curve_sets_feed_the_scanner() {
        let ctx = ctx();
        let mut sig = aggregator();
        let mut bkg = aggregator();
        for &t in &[0.2, 0.25, 0.4, 0.45, 0.6] {
            sig.accumulate(&event(350.0, t, 0.9), &ctx).unwrap();
            sig.accumulate(&event(450.0, t, 0.9), &ctx).unwrap();
        }
        for &t in &[0.4, 0.6, 0.65, 0.8, 0.85, 0.95, 0.97, 0.98, 0.99, 0.99] {
            bkg.accumulate(&event(350.0, t, 0.1), &ctx).unwrap();
            bkg.accumulate(&event(450.0, t, 0.1), &ctx).unwrap();
        }
        let sets = build_curve_sets(&sig, &bkg, &tagger(), JetCategory::Inclusive, &[MergeScenario::Background])
            .unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].label(), "inclusive/300to400");

        // Background efficiencies per threshold [0.9, 0.7, 0.5, 0.3]: 0.5, 0.3, 0.1, 0.0.
        let wp = scan_working_point(&sets[0], 0.22).unwrap();
        assert_eq!(wp.index, 1);
        assert_relative_eq!(wp.achieved, 0.3);
        assert_eq!(wp.threshold, 0.7);
        assert_relative_eq!(wp.signal_eff.unwrap(), 1.0);
        assert_relative_eq!(wp.signal_tagged_eff.unwrap(), 1.0);
        assert_eq!(wp.background_tagged_eff, Some(0.0));
    }
}
