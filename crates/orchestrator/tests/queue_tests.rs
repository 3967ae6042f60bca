mod support;

use futures::future::join_all;
use orchestrator::{ExecutionEvent, ExecutionRequest, ExecutionState, ExecutionTopics};
use support::{manager, ScriptedPrimitive};

#[tokio::test(start_paused = true)]
async fn requests_run_one_at_a_time_in_submission_order() {
    let primitive = ScriptedPrimitive::new();
    let manager = manager(primitive.clone());

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let delay = 500 - i * 100;
            manager.submit(ExecutionRequest::new(format!("sleep:{delay}")).with_id(format!("r-{i}")))
        })
        .collect();
    let outcomes = join_all(handles).await;

    assert!(outcomes.iter().all(|o| o.success));
    let ids: Vec<_> = outcomes.iter().map(|o| o.request_id.as_str()).collect();
    assert_eq!(ids, vec!["r-0", "r-1", "r-2", "r-3", "r-4"]);
    assert_eq!(
        primitive.calls(),
        vec!["sleep:500", "sleep:400", "sleep:300", "sleep:200", "sleep:100"]
    );
    assert_eq!(primitive.max_active(), 1);
}

#[tokio::test(start_paused = true)]
async fn queue_length_is_announced_on_every_change() {
    let primitive = ScriptedPrimitive::new();
    let manager = manager(primitive);
    let mut queue_events = manager.subscribe(ExecutionTopics::QUEUE_CHANGED);
    let mut all_events = manager.subscribe_all();

    let slow = manager.submit(ExecutionRequest::new("sleep:2000"));
    let second = manager.submit(ExecutionRequest::new("ok:2"));
    let third = manager.submit(ExecutionRequest::new("ok:3"));
    join_all([slow, second, third]).await;

    let mut lengths = Vec::new();
    while let Ok(envelope) = queue_events.try_recv() {
        if let ExecutionEvent::QueueChanged(change) = envelope.payload {
            lengths.push(change.length);
        }
    }
    assert_eq!(lengths, vec![1, 2, 3, 2, 1, 0]);

    let mut executing = 0i32;
    let mut completed = 0;
    while let Ok(envelope) = all_events.try_recv() {
        match envelope.payload {
            ExecutionEvent::StateChanged(change) => match change.to {
                ExecutionState::Executing => {
                    executing += 1;
                    assert_eq!(executing, 1, "two executions overlapped");
                }
                ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Timeout => {
                    executing -= 1;
                }
                _ => {}
            },
            ExecutionEvent::ExecutionCompleted(_) => completed += 1,
            _ => {}
        }
    }
    assert_eq!(executing, 0);
    assert_eq!(completed, 3);
}

#[tokio::test(start_paused = true)]
async fn current_request_is_tracked() {
    let primitive = ScriptedPrimitive::new();
    let manager = manager(primitive);
    let mut current_events = manager.subscribe(ExecutionTopics::CURRENT_CHANGED);

    manager
        .submit(ExecutionRequest::new("ok:1").with_id("first"))
        .await;
    assert_eq!(manager.current_request(), None);

    let mut seen = Vec::new();
    while let Ok(envelope) = current_events.try_recv() {
        if let ExecutionEvent::CurrentChanged(change) = envelope.payload {
            seen.push(change.current);
        }
    }
    assert_eq!(seen, vec![Some("first".to_string()), None]);
}

#[tokio::test(start_paused = true)]
async fn a_panicking_execution_does_not_stall_the_queue() {
    let primitive = ScriptedPrimitive::new();
    let manager = manager(primitive.clone());

    let exploding = manager.submit(ExecutionRequest::new("panic"));
    let next = manager.submit(ExecutionRequest::new("ok:after"));

    let exploded = exploding.await;
    assert!(!exploded.success);
    let error = exploded.error.unwrap();
    assert_eq!(error.name, "EnginePanic");
    assert!(error.message.contains("primitive exploded"));
    assert!(exploded.classification.is_some());

    let after = next.await;
    assert!(after.success);
    assert_eq!(after.value, Some(serde_json::json!("after")));
    assert_eq!(manager.summary().total, 2);
}

#[tokio::test(start_paused = true)]
async fn dropped_handles_do_not_block_later_requests() {
    let primitive = ScriptedPrimitive::new();
    let manager = manager(primitive.clone());

    drop(manager.submit(ExecutionRequest::new("sleep:100")));
    let outcome = manager.submit(ExecutionRequest::new("ok:still")).await;

    assert!(outcome.success);
    assert_eq!(primitive.call_count(), 2);
}
