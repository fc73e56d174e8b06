use crate::infra::{parse_basis, parse_percent, sample_dataset, InMemoryScoreStore};
use chrono::Local;
use clap::Args;
use stack_rank::config::AppConfig;
use stack_rank::error::AppError;
use stack_rank::ranking::{
    AdjustmentPreview, Alias, PercentileBasis, PercentileBucket, RankingEngine, RankingRow,
    RankingService, ScoreStore,
};
use stack_rank::store::CsvScoreStore;
use stack_rank::telemetry::{self, LogSink};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct RankingReportArgs {
    /// Directory holding the CSV tables (defaults to RANK_DATA_DIR)
    #[arg(long)]
    pub(crate) data_dir: Option<PathBuf>,
    /// Limit the report to these roles (repeatable)
    #[arg(long)]
    pub(crate) role: Vec<String>,
}

#[derive(Args, Debug)]
pub(crate) struct PercentileReportArgs {
    /// Directory holding the CSV tables (defaults to RANK_DATA_DIR)
    #[arg(long)]
    pub(crate) data_dir: Option<PathBuf>,
    /// Order cohorts by weighted score or by rank
    #[arg(long, default_value = "weighted", value_parser = parse_basis)]
    pub(crate) basis: PercentileBasis,
    /// Bucket a single role instead of every role
    #[arg(long)]
    pub(crate) role: Option<String>,
}

#[derive(Args, Debug)]
pub(crate) struct PreviewReportArgs {
    /// Directory holding the CSV tables (defaults to RANK_DATA_DIR)
    #[arg(long)]
    pub(crate) data_dir: Option<PathBuf>,
    /// Member to move one level toward their expected rank
    #[arg(long)]
    pub(crate) alias: String,
    /// Metrics the solver may change (repeatable). Defaults to every metric weighted for the role.
    #[arg(long)]
    pub(crate) metric: Vec<String>,
    /// Margin beyond the reference score, in percent (defaults to RANK_DEFAULT_PERCENT)
    #[arg(long, value_parser = parse_percent)]
    pub(crate) percent: Option<f64>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Margin beyond the reference score, in percent
    #[arg(long, value_parser = parse_percent)]
    pub(crate) percent: Option<f64>,
    /// Stop after the preview instead of applying the proposed scores
    #[arg(long)]
    pub(crate) skip_apply: bool,
}

fn offline_service(
    data_dir: Option<PathBuf>,
) -> Result<RankingService<CsvScoreStore>, AppError> {
    let mut config = AppConfig::load()?;
    if let Some(data_dir) = data_dir {
        config.data.data_dir = data_dir;
    }
    telemetry::init_with_sink(&config.telemetry, LogSink::Stderr)?;

    let store = Arc::new(CsvScoreStore::new(
        config.data.data_dir.clone(),
        config.data.limits,
    ));
    Ok(RankingService::new(store, config.adjustment)?)
}

pub(crate) fn run_ranking_report(args: RankingReportArgs) -> Result<(), AppError> {
    let service = offline_service(args.data_dir)?;
    let roles: BTreeSet<String> = args.role.into_iter().collect();
    let filter = (!roles.is_empty()).then_some(&roles);

    let rows = service.compute_rankings(filter)?;
    render_rankings(&rows);
    let mismatches: Vec<RankingRow> = rows.into_iter().filter(|row| row.mismatch).collect();
    render_mismatches(&mismatches);
    Ok(())
}

pub(crate) fn run_percentile_report(args: PercentileReportArgs) -> Result<(), AppError> {
    let service = offline_service(args.data_dir)?;
    let buckets = service.compute_percentiles(args.role.as_deref(), args.basis)?;
    render_percentiles(&buckets, args.basis);
    Ok(())
}

pub(crate) fn run_preview_report(args: PreviewReportArgs) -> Result<(), AppError> {
    let service = offline_service(args.data_dir)?;
    let alias = Alias::new(&args.alias);
    let metrics = if args.metric.is_empty() {
        weighted_metrics(&service, &alias)
    } else {
        args.metric
    };

    let preview = service.preview_adjustment(&alias, metrics, args.percent)?;
    render_preview(&preview);
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        percent,
        skip_apply,
    } = args;

    let dataset = sample_dataset()?;
    let store = Arc::new(InMemoryScoreStore::new(dataset.clone()));
    let service = RankingService::with_dataset(store, dataset, AppConfig::load()?.adjustment);

    println!(
        "Stack rank demo ({})",
        Local::now().format("%Y-%m-%d %H:%M")
    );
    let roles = service.roles();
    println!(
        "- {} members across {} roles",
        roles.counts_by_role.values().sum::<usize>(),
        roles.roles.len()
    );

    let rows = service.compute_rankings(None)?;
    render_rankings(&rows);
    let mismatches = service.mismatches()?;
    render_mismatches(&mismatches);

    let Some(subject) = mismatches.first() else {
        println!("\nEvery member already sits at their expected rank.");
        return Ok(());
    };

    let metrics = weighted_metrics(&service, &subject.alias);
    let preview = match service.preview_adjustment(&subject.alias, metrics, percent) {
        Ok(preview) => preview,
        Err(err) => {
            println!("\nPreview unavailable for {}: {}", subject.alias, err);
            return Ok(());
        }
    };
    render_preview(&preview);

    if skip_apply {
        return Ok(());
    }

    let shift = service.check_one_level(&subject.alias, &preview.proposal.proposed_scores)?;
    println!(
        "\nApplying proposal: rank {} -> {} ({})",
        shift.before,
        shift.after,
        if shift.within_one_level {
            "one level"
        } else {
            "more than one level"
        }
    );
    let applied = service.apply_adjustment(&subject.alias, &preview.proposal.proposed_scores)?;
    println!("- written at {}", applied.updated_at.to_rfc3339());
    let cohort: Vec<RankingRow> = applied
        .rankings
        .into_iter()
        .filter(|row| row.role == subject.role)
        .collect();
    render_rankings(&cohort);
    Ok(())
}

fn weighted_metrics<S: ScoreStore + 'static>(service: &RankingService<S>, alias: &Alias) -> Vec<String> {
    let dataset = service.snapshot();
    let Some(member) = dataset.member(alias) else {
        return Vec::new();
    };
    RankingEngine::default()
        .applicable_metrics(&dataset, &member.role)
        .into_iter()
        .map(|metric| metric.name.clone())
        .collect()
}

fn render_rankings(rows: &[RankingRow]) {
    let mut current_role: Option<&str> = None;
    for row in rows {
        if current_role != Some(row.role.as_str()) {
            println!("\n{} rankings", row.role);
            current_role = Some(row.role.as_str());
        }
        let expected = row
            .expected_rank
            .map(|rank| rank.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:>3}. {:<12} {:>8.2}  expected {:>3}{}",
            row.rank,
            row.alias.as_str(),
            row.weighted_score,
            expected,
            if row.mismatch { "  *" } else { "" }
        );
    }
}

fn render_mismatches(rows: &[RankingRow]) {
    if rows.is_empty() {
        println!("\nNo expected-rank mismatches");
        return;
    }
    println!("\nExpected-rank mismatches");
    for row in rows {
        println!(
            "- {} ({}): rank {} vs expected {} (gap {})",
            row.alias,
            row.role,
            row.rank,
            row.expected_rank.unwrap_or_default(),
            row.rank_gap()
        );
    }
}

fn render_percentiles(buckets: &BTreeMap<String, Vec<PercentileBucket>>, basis: PercentileBasis) {
    for (role, buckets) in buckets {
        println!("\n{role} percentiles ({basis:?})");
        for bucket in buckets.iter().filter(|bucket| bucket.count > 0) {
            let members: Vec<String> = bucket
                .members
                .iter()
                .map(|member| format!("{} {:.2}", member.alias, member.value))
                .collect();
            println!("  p{:>3}: {}", bucket.pct, members.join(", "));
        }
    }
}

fn render_preview(preview: &AdjustmentPreview) {
    let proposal = &preview.proposal;
    println!(
        "\nAdjustment preview for {} ({}): {:?} from rank {} toward {}",
        proposal.alias,
        proposal.role,
        proposal.direction,
        proposal.current_rank,
        proposal.expected_rank
    );
    println!(
        "- reference {} at {:.2}; target {:.2} ({}% margin, rank {})",
        proposal.reference,
        proposal.reference_weighted_score,
        proposal.target_weighted_score,
        preview.percent,
        preview.target_rank
    );
    if let Some(guard) = &preview.guard {
        println!("- capped by {} at {:.2}", guard.member, guard.limit);
    }
    println!(
        "- weighted score {:.2} -> {:.2} after {} pass(es){}",
        proposal.current_weighted_score,
        proposal.achieved_weighted_score,
        proposal.passes,
        if proposal.fully_achieved {
            ""
        } else {
            " (target not fully reached)"
        }
    );
    for diff in &proposal.diff {
        println!(
            "    - {}: {:.2} -> {:.2} ({:+.2})",
            diff.metric, diff.old, diff.new, diff.delta
        );
    }
    if !proposal.hit_clamps.is_empty() {
        println!("  Clamped at bounds: {}", proposal.hit_clamps.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stack_rank::ranking::AdjustmentSettings;

    fn sample_service() -> RankingService<InMemoryScoreStore> {
        let dataset = sample_dataset().expect("sample validates");
        let store = Arc::new(InMemoryScoreStore::new(dataset.clone()));
        RankingService::with_dataset(store, dataset, AdjustmentSettings::default())
    }

    #[test]
    fn weighted_metrics_skip_zero_weight_columns() {
        let service = sample_service();
        assert_eq!(
            weighted_metrics(&service, &Alias::new("QA02")),
            vec!["Delivery", "Test Coverage", "Defect Triage"]
        );
        assert!(weighted_metrics(&service, &Alias::new("nobody")).is_empty());
    }

    #[test]
    fn sample_preview_moves_first_mismatch_up_one_level() {
        let service = sample_service();
        let alias = Alias::new("Dev03");
        let preview = service
            .preview_adjustment(&alias, weighted_metrics(&service, &alias), None)
            .expect("preview builds");

        assert_eq!(preview.target_rank, 2);
        assert_eq!(preview.proposal.reference, Alias::new("Dev02"));
        assert!(preview.guard.is_some());
        assert!(preview.proposal.achieved_weighted_score > preview.proposal.current_weighted_score);
    }

    #[test]
    fn demo_runs_end_to_end_on_sample_team() {
        run_demo(DemoArgs::default()).expect("demo completes");
    }
}
