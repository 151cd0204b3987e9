use crate::infra::*;

/// Subscribe over the network, publish, and watch the event reach the
/// subscriber's local infrastructure through its device adapter.
#[test]
fn subscribe_then_publish_delivers_the_event() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw").unwrap();
    gw_b.registry.establish("dev-b", "pw").unwrap();
    let subscriber = gw_a.registry.session("dev-a").unwrap();
    let owner = gw_b.registry.session("dev-b").unwrap();

    owner.activate_event_channel("tempChanged");
    let response = subscriber
        .remote_subscribe("dev-b", "tempChanged")
        .expect("subscribe acknowledged");
    assert!(!response.error);

    let report = owner
        .publish_event("tempChanged", Some("22.5".to_string()), Default::default())
        .unwrap();
    assert_eq!((report.sent, report.total), (1, 1));

    assert!(eventually(|| gw_a.adapter.calls("forward_event") == 1));
    let forwarded = gw_a.adapter.forwarded();
    assert_eq!(forwarded[0].0, "dev-b");
    assert_eq!(forwarded[0].1, "tempChanged");
    assert_eq!(forwarded[0].2.as_deref(), Some("22.5"));

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}

/// Fan-out over three subscribers where delivery fails for exactly one.
#[test]
fn fanout_counts_failed_deliveries() {
    let hub = Hub::new();
    let gw_owner = gateway(&hub);
    let subscribers = [gateway(&hub), gateway(&hub), gateway(&hub)];

    gw_owner.registry.establish("dev-a", "pw").unwrap();
    let owner = gw_owner.registry.session("dev-a").unwrap();
    owner.activate_event_channel("tempChanged");

    for (i, gw) in subscribers.iter().enumerate() {
        let identity = format!("dev-{}", ["b", "c", "d"][i]);
        gw.registry.establish(&identity, "pw").unwrap();
        let session = gw.registry.session(&identity).unwrap();
        session
            .remote_subscribe("dev-a", "tempChanged")
            .expect("subscribe acknowledged");
    }

    hub.fail_delivery_to("dev-c");
    let report = owner
        .publish_event("tempChanged", Some("21".to_string()), Default::default())
        .unwrap();
    assert_eq!((report.sent, report.total), (2, 3));

    gw_owner.registry.terminate_all();
    for gw in &subscribers {
        gw.registry.terminate_all();
    }
}

/// An unsubscribed peer stops receiving; re-subscribing reports no change
/// the second time around on the owner's side.
#[test]
fn unsubscribe_stops_delivery() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw").unwrap();
    gw_b.registry.establish("dev-b", "pw").unwrap();
    let subscriber = gw_a.registry.session("dev-a").unwrap();
    let owner = gw_b.registry.session("dev-b").unwrap();

    owner.activate_event_channel("doorOpened");
    subscriber.remote_subscribe("dev-b", "doorOpened").unwrap();
    assert!(subscriber
        .subscription()
        .is_subscribed(&portico_services::events::channel_key("dev-b", "doorOpened")));

    subscriber.remote_unsubscribe("dev-b", "doorOpened").unwrap();
    assert!(!subscriber
        .subscription()
        .is_subscribed(&portico_services::events::channel_key("dev-b", "doorOpened")));

    let report = owner
        .publish_event("doorOpened", None, Default::default())
        .unwrap();
    assert_eq!((report.sent, report.total), (0, 0));

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}

/// Deactivation pauses publishing but keeps the subscriber set; after
/// reactivation delivery resumes to the same subscribers.
#[test]
fn deactivation_pauses_without_losing_subscribers() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw").unwrap();
    gw_b.registry.establish("dev-b", "pw").unwrap();
    let subscriber = gw_a.registry.session("dev-a").unwrap();
    let owner = gw_b.registry.session("dev-b").unwrap();

    owner.activate_event_channel("tempChanged");
    subscriber.remote_subscribe("dev-b", "tempChanged").unwrap();

    assert!(owner.deactivate_event_channel("tempChanged"));
    assert!(owner
        .publish_event("tempChanged", None, Default::default())
        .is_err());

    owner.activate_event_channel("tempChanged");
    let report = owner
        .publish_event("tempChanged", None, Default::default())
        .unwrap();
    assert_eq!((report.sent, report.total), (1, 1));

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}

/// A remote peer can list the event channels an object exposes.
#[test]
fn events_list_is_served_from_the_owner_channels() {
    let hub = Hub::new();
    let gw_a = gateway(&hub);
    let gw_b = gateway(&hub);

    gw_a.registry.establish("dev-a", "pw").unwrap();
    gw_b.registry.establish("dev-b", "pw").unwrap();
    let caller = gw_a.registry.session("dev-a").unwrap();
    let owner = gw_b.registry.session("dev-b").unwrap();

    owner.activate_event_channel("tempChanged");
    owner.activate_event_channel("doorOpened");

    let response = caller.remote_events_list("dev-b").expect("list response");
    let mut listed: Vec<String> =
        serde_json::from_str(response.body.as_deref().unwrap()).unwrap();
    listed.sort();
    assert_eq!(listed, vec!["doorOpened".to_string(), "tempChanged".to_string()]);

    gw_a.registry.terminate_all();
    gw_b.registry.terminate_all();
}
