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

//! The aggregation rule applied at finalization time: a pure function over
//! an execution's current shard results, free of any Store or HTTP
//! dependency so it can be tested in isolation.

use teo_core::model::{AggregatedResults, Execution, ExecutionStatus, ShardStatus};

/// Compute the overall status and aggregated totals for `exec` from
/// whatever shard results it currently holds. A missing shard or any
/// shard reporting `error` yields overall `error`.
pub fn aggregate(exec: &Execution) -> (ExecutionStatus, AggregatedResults) {
    let mut total = 0;
    let mut passed = 0;
    let mut failed = 0;
    let mut skipped = 0;
    let mut failed_tests = Vec::new();
    let mut any_error = false;
    let mut all_passed = true;

    for (_, shard) in exec.shard_results.iter() {
        total += shard.total;
        passed += shard.passed;
        failed += shard.failed;
        skipped += shard.skipped;
        failed_tests.extend(shard.failed_tests.iter().cloned());
        if shard.status == ShardStatus::Error {
            any_error = true;
        }
        if shard.status != ShardStatus::Passed {
            all_passed = false;
        }
    }

    let aggregated = AggregatedResults {
        total,
        passed,
        failed,
        skipped,
        failed_tests,
    };

    let status = if !exec.has_all_shards() || any_error {
        ExecutionStatus::Error
    } else if failed > 0 {
        ExecutionStatus::Failed
    } else if all_passed && failed == 0 {
        ExecutionStatus::Completed
    } else {
        ExecutionStatus::Error
    };

    (status, aggregated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use teo_core::model::ShardResult;

    fn base_execution(total_shards: u32) -> Execution {
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
            status: ExecutionStatus::Running,
            assigned_runner_id: Some(1),
            total_shards,
            shard_results: BTreeMap::new(),
            aggregated_results: None,
            created_at: 0,
            assigned_at: None,
            started_at: Some(0),
            completed_at: None,
            webhook_url: None,
            metadata: HashMap::new(),
            terminal_reason: None,
        }
    }

    fn shard(status: ShardStatus, total: u32, passed: u32, failed: u32) -> ShardResult {
        ShardResult {
            status,
            total,
            passed,
            failed,
            skipped: 0,
            failed_tests: vec![],
            artifact_refs: None,
        }
    }

    #[test]
    fn single_shard_all_passed_is_completed() {
        let mut exec = base_execution(1);
        exec.shard_results.insert(1, shard(ShardStatus::Passed, 10, 10, 0));
        let (status, aggregated) = aggregate(&exec);
        assert_eq!(status, ExecutionStatus::Completed);
        assert_eq!(aggregated.total, 10);
        assert_eq!(aggregated.failed, 0);
    }

    #[test]
    fn sharded_aggregation_with_partial_failure() {
        let mut exec = base_execution(4);
        exec.shard_results.insert(1, shard(ShardStatus::Passed, 25, 23, 2));
        exec.shard_results.insert(2, shard(ShardStatus::Passed, 25, 25, 0));
        exec.shard_results.insert(3, shard(ShardStatus::Failed, 25, 20, 5));
        exec.shard_results.insert(4, shard(ShardStatus::Passed, 25, 25, 0));
        let (status, aggregated) = aggregate(&exec);
        assert_eq!(status, ExecutionStatus::Failed);
        assert_eq!(aggregated.total, 100);
        assert_eq!(aggregated.passed, 93);
        assert_eq!(aggregated.failed, 7);
    }

    #[test]
    fn missing_shard_yields_error() {
        let mut exec = base_execution(2);
        exec.shard_results.insert(1, shard(ShardStatus::Passed, 10, 10, 0));
        let (status, _) = aggregate(&exec);
        assert_eq!(status, ExecutionStatus::Error);
    }

    #[test]
    fn any_shard_error_yields_overall_error() {
        let mut exec = base_execution(2);
        exec.shard_results.insert(1, shard(ShardStatus::Passed, 10, 10, 0));
        exec.shard_results.insert(2, shard(ShardStatus::Error, 0, 0, 0));
        let (status, _) = aggregate(&exec);
        assert_eq!(status, ExecutionStatus::Error);
    }
}
