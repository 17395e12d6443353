// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! The Load-Balancing Rule Engine (component C5, spec §4.4): a pure
//! function over a queue item, a candidate set, and the active rules that
//! picks a runner, or reports that none is suitable. It touches no I/O and
//! holds no state of its own — the Scheduler owns persisting any
//! round-robin cursor advance this module decides on.

use teo_core::model::{Execution, LoadBalancingRule, Runner, RuleKind};
use teo_core::pattern;

/// A candidate runner annotated with the live load data the Rule Engine
/// needs but cannot see on its own (inflight count from the Registry,
/// resource load from live allocations in the Store).
#[derive(Debug, Clone)]
pub struct RunnerCandidate {
    pub runner: Runner,
    pub inflight: u32,
    /// `Σ cpu_allocated + (Σ memory_allocated)/1024` over this runner's
    /// live allocations (spec §4.4, `resource-based`; advisory, see §9
    /// open question 5).
    pub load_score: f64,
}

/// Outcome of [`select`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Assign to this runner. If the selecting rule was `round-robin`,
    /// `round_robin_advance` carries `(rule_id, new_cursor)` for the
    /// Scheduler to persist once the assignment actually commits.
    Assign {
        runner_id: u64,
        round_robin_advance: Option<(u64, u64)>,
    },
    /// No candidate was supplied; try again on a later tick (spec §4.4,
    /// "`NoSuitable` is returned only if the candidate list is empty on
    /// entry").
    NoSuitable,
}

/// Evaluate the active `rules` (already filtered to `active = true`,
/// ordered by the caller however it likes — this function re-sorts by
/// `priority DESC`) against `item` and `candidates`.
pub fn select(item: &Execution, candidates: &[RunnerCandidate], rules: &[LoadBalancingRule]) -> Selection {
    if candidates.is_empty() {
        return Selection::NoSuitable;
    }

    let mut ordered_rules: Vec<&LoadBalancingRule> = rules.iter().filter(|r| r.active).collect();
    ordered_rules.sort_by(|a, b| b.priority.cmp(&a.priority));

    for rule in ordered_rules {
        if !rule_matches(rule, item) {
            continue;
        }
        if let Some(selection) = apply_rule(rule, candidates) {
            return selection;
        }
    }

    // No rule matched (or every matching rule's restriction emptied the
    // candidate set): default to priority-based over the full set.
    priority_based(candidates)
        .map(|runner_id| Selection::Assign {
            runner_id,
            round_robin_advance: None,
        })
        .unwrap_or(Selection::NoSuitable)
}

fn rule_matches(rule: &LoadBalancingRule, item: &Execution) -> bool {
    pattern::matches(rule.test_suite_pattern.as_deref(), &item.test_suite)
        && pattern::matches(rule.environment_pattern.as_deref(), &item.environment)
        && match (&rule.runner_type_filter, &item.requested_runner_type) {
            (None, _) => true,
            (Some(p), Some(t)) => pattern::matches(Some(p.as_str()), t),
            // A rule restricted to a runner type still applies to
            // executions that did not request a specific type: the
            // restriction is enforced inside `apply_rule` (type-filter /
            // affinity) against the candidate set, not the request.
            (Some(_), None) => true,
        }
}

fn apply_rule(rule: &LoadBalancingRule, candidates: &[RunnerCandidate]) -> Option<Selection> {
    match rule.kind {
        RuleKind::PriorityBased => priority_based(candidates).map(|runner_id| Selection::Assign {
            runner_id,
            round_robin_advance: None,
        }),
        RuleKind::ResourceBased => resource_based(candidates).map(|runner_id| Selection::Assign {
            runner_id,
            round_robin_advance: None,
        }),
        RuleKind::Affinity => {
            let restricted: Vec<RunnerCandidate> = candidates
                .iter()
                .filter(|c| {
                    rule.config
                        .required_capabilities
                        .iter()
                        .all(|cap| c.runner.capabilities.contains(cap))
                })
                .cloned()
                .collect();
            if restricted.is_empty() {
                return None;
            }
            priority_based(&restricted).map(|runner_id| Selection::Assign {
                runner_id,
                round_robin_advance: None,
            })
        }
        RuleKind::TypeFilter => {
            let Some(runner_type) = &rule.config.runner_type else {
                return None;
            };
            let restricted: Vec<RunnerCandidate> = candidates
                .iter()
                .filter(|c| &c.runner.runner_type == runner_type)
                .cloned()
                .collect();
            if restricted.is_empty() {
                return None;
            }
            priority_based(&restricted).map(|runner_id| Selection::Assign {
                runner_id,
                round_robin_advance: None,
            })
        }
        RuleKind::RoundRobin => round_robin(rule, candidates),
    }
}

/// Highest `runner.priority`; ties broken by lower inflight, then lower
/// `runner_id` (spec §4.4).
fn priority_based(candidates: &[RunnerCandidate]) -> Option<u64> {
    candidates
        .iter()
        .max_by(|a, b| {
            a.runner
                .priority
                .cmp(&b.runner.priority)
                .then_with(|| b.inflight.cmp(&a.inflight))
                .then_with(|| b.runner.runner_id.cmp(&a.runner.runner_id))
        })
        .map(|c| c.runner.runner_id)
}

/// Minimizes `load_score`; ties as in `priority_based`.
fn resource_based(candidates: &[RunnerCandidate]) -> Option<u64> {
    candidates
        .iter()
        .min_by(|a, b| {
            a.load_score
                .partial_cmp(&b.load_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.inflight.cmp(&b.inflight))
                .then_with(|| a.runner.runner_id.cmp(&b.runner.runner_id))
        })
        .map(|c| c.runner.runner_id)
}

/// Per-rule persistent cursor over candidates sorted by `runner_id`. The
/// cursor only actually advances once the Scheduler commits the
/// assignment (spec §4.4); here we just compute what the next cursor
/// value would be.
fn round_robin(rule: &LoadBalancingRule, candidates: &[RunnerCandidate]) -> Option<Selection> {
    if candidates.is_empty() {
        return None;
    }
    let mut sorted: Vec<&RunnerCandidate> = candidates.iter().collect();
    sorted.sort_by_key(|c| c.runner.runner_id);

    let index = (rule.round_robin_cursor as usize) % sorted.len();
    let chosen = sorted[index];
    let new_cursor = rule.round_robin_cursor.wrapping_add(1);

    Some(Selection::Assign {
        runner_id: chosen.runner.runner_id,
        round_robin_advance: Some((rule.rule_id, new_cursor)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use teo_core::model::{ExecutionStatus, RuleConfig, RunnerHealth, RunnerStatus};

    fn runner(id: u64, priority: i32, runner_type: &str) -> Runner {
        Runner {
            runner_id: id,
            name: format!("r{id}"),
            runner_type: runner_type.to_string(),
            endpoint_url: "http://x".to_string(),
            health_check_url: None,
            webhook_url: "http://x/webhook".to_string(),
            capabilities: HashSet::new(),
            max_concurrent_jobs: 10,
            priority,
            status: RunnerStatus::Active,
            health: RunnerHealth::Healthy,
            last_health_check_at: None,
            metadata: HashMap::new(),
        }
    }

    fn candidate(id: u64, priority: i32, inflight: u32, runner_type: &str) -> RunnerCandidate {
        RunnerCandidate {
            runner: runner(id, priority, runner_type),
            inflight,
            load_score: 0.0,
        }
    }

    fn execution() -> Execution {
        Execution {
            execution_id: "exec_1".into(),
            test_suite: "smoke".into(),
            environment: "staging".into(),
            branch: None,
            commit: None,
            requested_by: None,
            priority: 50,
            estimated_duration_ms: None,
            requested_runner_type: None,
            requested_runner_id: None,
            status: ExecutionStatus::Queued,
            assigned_runner_id: None,
            total_shards: 1,
            shard_results: Default::default(),
            aggregated_results: None,
            created_at: 0,
            assigned_at: None,
            started_at: None,
            completed_at: None,
            webhook_url: None,
            metadata: HashMap::new(),
            terminal_reason: None,
        }
    }

    #[test]
    fn empty_candidates_is_no_suitable() {
        assert_eq!(select(&execution(), &[], &[]), Selection::NoSuitable);
    }

    #[test]
    fn default_priority_based_when_no_rules() {
        let candidates = vec![candidate(1, 10, 0, "docker"), candidate(2, 50, 0, "docker")];
        let sel = select(&execution(), &candidates, &[]);
        assert_eq!(
            sel,
            Selection::Assign {
                runner_id: 2,
                round_robin_advance: None
            }
        );
    }

    #[test]
    fn priority_ties_break_on_lower_inflight_then_lower_id() {
        let candidates = vec![
            candidate(3, 50, 2, "docker"),
            candidate(1, 50, 1, "docker"),
            candidate(2, 50, 1, "docker"),
        ];
        let sel = select(&execution(), &candidates, &[]);
        assert_eq!(
            sel,
            Selection::Assign {
                runner_id: 1,
                round_robin_advance: None
            }
        );
    }

    #[test]
    fn round_robin_cursor_advances_per_call() {
        let rule = LoadBalancingRule {
            rule_id: 7,
            name: "rr".into(),
            active: true,
            priority: 100,
            kind: RuleKind::RoundRobin,
            test_suite_pattern: None,
            environment_pattern: None,
            runner_type_filter: None,
            config: RuleConfig::default(),
            round_robin_cursor: 0,
        };
        let candidates = vec![candidate(1, 50, 0, "docker"), candidate(2, 50, 0, "docker")];

        let first = select(&execution(), &candidates, std::slice::from_ref(&rule));
        assert_eq!(
            first,
            Selection::Assign {
                runner_id: 1,
                round_robin_advance: Some((7, 1))
            }
        );

        let mut advanced_rule = rule.clone();
        advanced_rule.round_robin_cursor = 1;
        let second = select(&execution(), &candidates, std::slice::from_ref(&advanced_rule));
        assert_eq!(
            second,
            Selection::Assign {
                runner_id: 2,
                round_robin_advance: Some((7, 2))
            }
        );
    }

    #[test]
    fn affinity_falls_back_to_priority_based_among_matching_capability() {
        let mut gpu_runner = runner(5, 10, "docker");
        gpu_runner.capabilities.insert("gpu".to_string());
        let candidates = vec![
            RunnerCandidate {
                runner: gpu_runner,
                inflight: 0,
                load_score: 0.0,
            },
            candidate(6, 90, 0, "docker"),
        ];
        let mut required = HashSet::new();
        required.insert("gpu".to_string());
        let rule = LoadBalancingRule {
            rule_id: 1,
            name: "affinity".into(),
            active: true,
            priority: 100,
            kind: RuleKind::Affinity,
            test_suite_pattern: None,
            environment_pattern: None,
            runner_type_filter: None,
            config: RuleConfig {
                required_capabilities: required,
                runner_type: None,
            },
            round_robin_cursor: 0,
        };
        let sel = select(&execution(), &candidates, &[rule]);
        assert_eq!(
            sel,
            Selection::Assign {
                runner_id: 5,
                round_robin_advance: None
            }
        );
    }

    #[test]
    fn type_filter_restricts_then_falls_back_to_priority() {
        let candidates = vec![candidate(1, 90, 0, "docker"), candidate(2, 10, 0, "jenkins")];
        let rule = LoadBalancingRule {
            rule_id: 2,
            name: "jenkins-only".into(),
            active: true,
            priority: 100,
            kind: RuleKind::TypeFilter,
            test_suite_pattern: None,
            environment_pattern: None,
            runner_type_filter: None,
            config: RuleConfig {
                required_capabilities: HashSet::new(),
                runner_type: Some("jenkins".to_string()),
            },
            round_robin_cursor: 0,
        };
        let sel = select(&execution(), &candidates, &[rule]);
        assert_eq!(
            sel,
            Selection::Assign {
                runner_id: 2,
                round_robin_advance: None
            }
        );
    }

    #[test]
    fn unmatched_pattern_skips_rule() {
        let candidates = vec![candidate(1, 10, 0, "docker")];
        let rule = LoadBalancingRule {
            rule_id: 3,
            name: "regression-only".into(),
            active: true,
            priority: 100,
            kind: RuleKind::PriorityBased,
            test_suite_pattern: Some("regression-*".to_string()),
            environment_pattern: None,
            runner_type_filter: None,
            config: RuleConfig::default(),
            round_robin_cursor: 0,
        };
        // item's test_suite is "smoke", rule only matches "regression-*":
        // rule is skipped, default priority-based still finds candidate 1.
        let sel = select(&execution(), &candidates, &[rule]);
        assert_eq!(
            sel,
            Selection::Assign {
                runner_id: 1,
                round_robin_advance: None
            }
        );
    }

    #[test]
    fn resource_based_minimizes_load_score() {
        let candidates = vec![
            RunnerCandidate {
                runner: runner(1, 50, "docker"),
                inflight: 0,
                load_score: 5.0,
            },
            RunnerCandidate {
                runner: runner(2, 50, "docker"),
                inflight: 0,
                load_score: 1.0,
            },
        ];
        let rule = LoadBalancingRule {
            rule_id: 4,
            name: "resource".into(),
            active: true,
            priority: 100,
            kind: RuleKind::ResourceBased,
            test_suite_pattern: None,
            environment_pattern: None,
            runner_type_filter: None,
            config: RuleConfig::default(),
            round_robin_cursor: 0,
        };
        let sel = select(&execution(), &candidates, &[rule]);
        assert_eq!(
            sel,
            Selection::Assign {
                runner_id: 2,
                round_robin_advance: None
            }
        );
    }
}
