//! Initial plan proposal: assess the input, build an agenda, order it.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Result, bail};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::core::types::{Degradation, Severity, Subtask};
use crate::io::oracle::{Judge, Scheduler};

/// The agreed initial plan together with the assessment it was built from.
#[derive(Debug, Clone)]
pub struct ProposedPlan {
    pub assessment: BTreeMap<Degradation, Severity>,
    pub plan: Vec<Subtask>,
}

/// Propose an ordered plan for `image`.
///
/// The agenda holds every subtask whose degradation the judge rates at
/// "medium" or worse, plus super-resolution when the caller's pixel policy
/// demands it. The agenda is shuffled before ordering: the ordering oracle is
/// presentation-order-sensitive and unordered input must not leak positional
/// bias. Agendas of one subtask or fewer skip the ordering oracle entirely.
pub fn propose(
    judge: &mut dyn Judge,
    scheduler: &mut dyn Scheduler,
    rng: &mut StdRng,
    image: &Path,
    add_super_resolution: bool,
    experience: Option<&str>,
) -> Result<ProposedPlan> {
    let assessment = judge.assess(image)?;
    for (degradation, severity) in &assessment {
        debug!(%degradation, %severity, "assessed input");
    }

    let mut agenda: Vec<Subtask> = assessment
        .iter()
        .filter(|(_, severity)| **severity >= Severity::Medium)
        .map(|(degradation, _)| degradation.subtask())
        .collect();
    if add_super_resolution {
        agenda.push(Subtask::SuperResolution);
    }
    agenda.shuffle(rng);
    info!(agenda = ?agenda.iter().map(|s| s.as_str()).collect::<Vec<_>>(), "built agenda");

    let plan = if agenda.len() <= 1 {
        agenda.clone()
    } else {
        let plan = scheduler.order(&agenda, experience, &[])?;
        ensure_permutation(&agenda, &plan)?;
        plan
    };
    info!(plan = ?plan.iter().map(|s| s.as_str()).collect::<Vec<_>>(), "proposed plan");

    Ok(ProposedPlan { assessment, plan })
}

/// Reject a scheduler response that is not an exact permutation of the agenda.
pub fn ensure_permutation(agenda: &[Subtask], plan: &[Subtask]) -> Result<()> {
    let mut expected = agenda.to_vec();
    expected.sort();
    let mut got = plan.to_vec();
    got.sort();
    if got != expected {
        bail!(
            "plan [{}] is not a permutation of agenda [{}]",
            plan.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", "),
            agenda.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
        );
    }
    Ok(())
}
