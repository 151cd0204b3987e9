use crate::infra::*;
use portico_services::task::TaskStatus;

fn task_id_of(response: &portico_core::Response) -> String {
    let body: serde_json::Value = serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
    body["taskId"].as_str().unwrap().to_string()
}

/// Start an action remotely, watch it get promoted by the owner's
/// maintenance pass, report completion from the device side, and read the
/// result back over the network.
#[test]
fn remote_action_runs_to_completion() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw").unwrap();
    gw_b.registry.establish("dev-b", "pw").unwrap();
    let caller = gw_a.registry.session("dev-a").unwrap();
    let owner = gw_b.registry.session("dev-b").unwrap();

    let started = caller
        .remote_start_action("dev-b", "open-door", Some("{}".to_string()), Default::default())
        .expect("start acknowledged");
    assert_eq!(started.status_code, 201);
    let task_id = task_id_of(&started);

    // the owner's once-a-second maintenance pass starts the task
    assert!(eventually(|| {
        owner
            .action("open-door")
            .map(|action| action.task_status(&task_id) == TaskStatus::Running)
            .unwrap_or(false)
    }));
    assert_eq!(gw_b.adapter.calls("start_action"), 1);

    let status = caller
        .remote_task_status("dev-b", "open-door", &task_id)
        .expect("status response");
    let report: serde_json::Value = serde_json::from_str(status.body.as_deref().unwrap()).unwrap();
    assert_eq!(report["status"], "running");

    // the device reports completion through the owner gateway
    owner
        .update_local_task("open-door", TaskStatus::Finished, Some("opened".to_string()))
        .unwrap();

    let status = caller
        .remote_task_status("dev-b", "open-door", &task_id)
        .expect("status response");
    let report: serde_json::Value = serde_json::from_str(status.body.as_deref().unwrap()).unwrap();
    assert_eq!(report["status"], "finished");
    assert_eq!(report["returnValue"], "opened");
    assert!(report["endTime"].is_number());

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}

/// Canceling a task that is still queued completes it locally as
/// "canceled" — the owner's device adapter is never asked to abort
/// anything, because nothing is running remotely yet.
#[test]
fn cancel_of_queued_task_skips_the_device() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw").unwrap();
    gw_b.registry.establish("dev-b", "pw").unwrap();
    let caller = gw_a.registry.session("dev-a").unwrap();
    let owner = gw_b.registry.session("dev-b").unwrap();

    // two submissions: the first will occupy the runner, the second queues
    let first = caller
        .remote_start_action("dev-b", "open-door", None, Default::default())
        .expect("first start acknowledged");
    let second = caller
        .remote_start_action("dev-b", "open-door", None, Default::default())
        .expect("second start acknowledged");
    let queued_task = task_id_of(&second);

    let canceled = caller
        .remote_cancel_task("dev-b", "open-door", &queued_task, None)
        .expect("cancel response");
    assert!(!canceled.error);
    let body: serde_json::Value =
        serde_json::from_str(canceled.body.as_deref().unwrap()).unwrap();
    assert_eq!(body["status"], "finished");
    assert_eq!(body["returnValue"], "canceled");

    assert_eq!(
        gw_b.adapter.calls("cancel_task"),
        0,
        "pending cancel must not contact the device"
    );
    let other = owner
        .action("open-door")
        .unwrap()
        .task_status(&task_id_of(&first));
    assert!(
        matches!(other, TaskStatus::Pending | TaskStatus::Running),
        "the other submission is untouched by the cancel, got {other:?}"
    );

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}

/// Canceling a running task goes through the device adapter.
#[test]
fn cancel_of_running_task_contacts_the_device() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw").unwrap();
    gw_b.registry.establish("dev-b", "pw").unwrap();
    let caller = gw_a.registry.session("dev-a").unwrap();
    let owner = gw_b.registry.session("dev-b").unwrap();

    let started = caller
        .remote_start_action("dev-b", "open-door", None, Default::default())
        .expect("start acknowledged");
    let task_id = task_id_of(&started);

    assert!(eventually(|| {
        owner
            .action("open-door")
            .map(|action| action.task_status(&task_id) == TaskStatus::Running)
            .unwrap_or(false)
    }));

    let canceled = caller
        .remote_cancel_task("dev-b", "open-door", &task_id, None)
        .expect("cancel response");
    assert!(!canceled.error);
    assert_eq!(gw_b.adapter.calls("cancel_task"), 1);
    assert_eq!(
        owner.action("open-door").unwrap().task_status(&task_id),
        TaskStatus::Finished
    );

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}

/// Status queries for tasks nobody has heard of say so, with the status
/// reported as unknown rather than any real state.
#[test]
fn status_of_missing_task_reports_unknown() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw").unwrap();
    gw_b.registry.establish("dev-b", "pw").unwrap();
    let caller = gw_a.registry.session("dev-a").unwrap();

    let status = caller
        .remote_task_status("dev-b", "open-door", "no-such-task")
        .expect("a response still arrives");
    assert!(status.error);
    assert_eq!(status.status_code, 404);
    let report: serde_json::Value = serde_json::from_str(status.body.as_deref().unwrap()).unwrap();
    assert_eq!(report["status"], "unknown");

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}
