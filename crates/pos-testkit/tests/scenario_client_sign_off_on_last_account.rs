//! Scenario: sign-off fires once, when the client's last account
//! completes, carrying the real account count.

use pos_eod::CancelFlag;
use pos_events::TOPIC_CLIENT_SIGNOFF;
use pos_testkit::{business_date, standard_snapshot, Harness};

#[tokio::test]
async fn sign_off_waits_for_the_last_account() {
    let h = Harness::new();
    let date = business_date();

    // Both accounts belong to CLI-7 before the run starts.
    h.store.register_account("A1", "CLI-7");
    h.store.register_account("A2", "CLI-7");
    h.upstream.always(standard_snapshot("A1", "CLI-7", date));
    h.upstream.always(standard_snapshot("A2", "CLI-7", date));

    h.engine.process_eod("A1", date, &CancelFlag::new()).await.unwrap();
    assert_eq!(h.bus.count(TOPIC_CLIENT_SIGNOFF), 0, "one account still open");

    h.engine.process_eod("A2", date, &CancelFlag::new()).await.unwrap();
    let sign_offs = h.bus.records(TOPIC_CLIENT_SIGNOFF);
    assert_eq!(sign_offs.len(), 1);
    assert_eq!(sign_offs[0].key, "CLI-7");
    assert_eq!(sign_offs[0].payload["payload"]["accountCount"], 2);
}
