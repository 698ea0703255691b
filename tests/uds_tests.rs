use std::time::Duration;

use fleetdiag::can::sim::SimEcu;
use fleetdiag::can::BusStatistics;
use fleetdiag::isotp;
use fleetdiag::uds::{
    DidLayout, NegativeResponseCode, SessionState, SessionType, UdsClient, XorSeedKey,
};
use fleetdiag::Error;

fn connected_client(sim: SimEcu) -> UdsClient<SimEcu> {
    let mut client = UdsClient::new(sim, 0x7e0);
    client.connect();
    client
}

#[tokio::test]
async fn read_dtc_returns_reported_set() {
    let mut client = connected_client(SimEcu::default());

    let dtcs = client.read_dtc(0xff).await.unwrap();
    let codes: Vec<&str> = dtcs.iter().map(|d| d.code.as_str()).collect();
    assert_eq!(codes, vec!["P0101", "P0102"]);
    assert!(dtcs[0].description.is_some());
}

#[tokio::test]
async fn read_dtc_empty_set_is_not_an_error() {
    let mut client = connected_client(SimEcu::default().with_dtcs(&[]));
    assert_eq!(client.read_dtc(0xff).await.unwrap(), vec![]);
}

#[tokio::test]
async fn read_dtc_applies_status_mask() {
    let sim = SimEcu::default().with_dtcs(&[("P0101", 0x01), ("P0102", 0x08)]);
    let mut client = connected_client(sim);

    let dtcs = client.read_dtc(0x08).await.unwrap();
    let codes: Vec<&str> = dtcs.iter().map(|d| d.code.as_str()).collect();
    assert_eq!(codes, vec!["P0102"]);
}

#[tokio::test]
async fn disconnected_client_fails_without_side_effects() {
    let mut client = UdsClient::new(SimEcu::default(), 0x7e0);

    assert_eq!(client.read_dtc(0xff).await, Err(Error::NotConnected));
    assert_eq!(client.statistics(), BusStatistics::default());
    assert_eq!(client.session(), SessionState::Disconnected);
}

#[tokio::test]
async fn clear_dtc_empties_the_reported_set() {
    let mut client = connected_client(SimEcu::default());

    assert_eq!(client.read_dtc(0xff).await.unwrap().len(), 2);
    client.clear_dtc().await.unwrap();
    assert!(client.read_dtc(0xff).await.unwrap().is_empty());
}

#[tokio::test]
async fn session_control_transitions_on_positive_response() {
    let mut client = connected_client(SimEcu::default());
    assert_eq!(client.session(), SessionState::Active(SessionType::Default));

    let record = client.session_control(SessionType::Extended).await.unwrap();
    assert_eq!(client.session(), SessionState::Active(SessionType::Extended));

    // The sim reports p2 = 50ms, p2* = 5000ms
    let record = record.unwrap();
    assert_eq!(record.p2_server_max, Duration::from_millis(50));
    assert_eq!(record.p2_star_server_max, Duration::from_millis(5000));
}

#[tokio::test]
async fn rejected_session_control_leaves_state_unchanged() {
    let sim = SimEcu::default().reject_session(SessionType::Programming);
    let mut client = connected_client(sim);

    let result = client.session_control(SessionType::Programming).await;
    assert_eq!(
        result,
        Err(Error::Uds(fleetdiag::uds::error::Error::SessionControlRejected(
            NegativeResponseCode::ConditionsNotCorrect
        )))
    );
    assert_eq!(client.session(), SessionState::Active(SessionType::Default));
}

#[tokio::test]
async fn session_control_while_disconnected_fails() {
    let mut client = UdsClient::new(SimEcu::default(), 0x7e0);
    assert_eq!(
        client.session_control(SessionType::Extended).await,
        Err(Error::NotConnected)
    );
    assert_eq!(client.session(), SessionState::Disconnected);
}

#[tokio::test]
async fn session_reverts_to_default_without_tester_present() {
    let mut client = connected_client(SimEcu::default());
    client.set_session_timeout(Duration::from_millis(50));

    client.session_control(SessionType::Extended).await.unwrap();
    assert_eq!(client.session(), SessionState::Active(SessionType::Extended));

    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(client.session(), SessionState::Active(SessionType::Default));
}

#[tokio::test]
async fn tester_present_keeps_session_alive() {
    let mut client = connected_client(SimEcu::default());
    client.set_session_timeout(Duration::from_millis(100));

    client.session_control(SessionType::Extended).await.unwrap();
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.tester_present(0x00).await.unwrap();
    }
    assert_eq!(client.session(), SessionState::Active(SessionType::Extended));
}

#[tokio::test]
async fn unresponsive_ecu_times_out() {
    let mut client = connected_client(SimEcu::default());
    client.set_response_timeout(Duration::from_millis(50));
    client.adapter_mut().drop_responses = true;

    assert_eq!(client.read_dtc(0xff).await, Err(Error::Timeout));
    // Protocol state is left unchanged
    assert_eq!(client.session(), SessionState::Active(SessionType::Default));
}

#[tokio::test]
async fn reordered_consecutive_frames_fail_reassembly() {
    // A 150 byte DID record forces a response of at least two consecutive frames
    let sim = SimEcu::default().with_did(0x1234, &[0xab; 150]);
    let mut client = connected_client(sim);
    client.adapter_mut().swap_consecutive_frames = true;

    let result = client.read_data_by_identifier(&[0x1234]).await;
    assert!(matches!(
        result,
        Err(Error::IsoTp(isotp::error::Error::Segmentation { .. }))
    ));
}

#[tokio::test]
async fn truncated_multi_frame_response_reports_incomplete() {
    // The 150 byte record spans two consecutive frames; the sim delivers only the
    // first of them, so the transfer is underway but can never finish
    let sim = SimEcu::default().with_did(0x1234, &[0xab; 150]);
    let mut client = connected_client(sim);
    client.set_response_timeout(Duration::from_millis(50));
    client.adapter_mut().drop_tail_consecutive_frames = true;

    let result = client.read_data_by_identifier(&[0x1234]).await;
    assert!(matches!(
        result,
        Err(Error::IsoTp(isotp::error::Error::Incomplete { .. }))
    ));
}

#[tokio::test]
async fn multi_frame_response_roundtrips() {
    let record = [0xab; 100];
    let sim = SimEcu::default().with_did(0x1234, &record);
    let mut client = connected_client(sim);

    let result = client.read_data_by_identifier(&[0x1234]).await.unwrap();
    assert_eq!(result[&0x1234], record.to_vec());
}

#[tokio::test]
async fn read_data_by_identifier_partial_success() {
    let mut client = connected_client(SimEcu::default());

    // 0xdead is not a DID the ECU knows; it is absent, not an error
    let result = client.read_data_by_identifier(&[0xf190, 0xdead]).await.unwrap();
    assert_eq!(result.len(), 1);
    assert!(result.contains_key(&0xf190));
}

#[tokio::test]
async fn read_data_by_identifier_none_supported() {
    let mut client = connected_client(SimEcu::default());

    let result = client.read_data_by_identifier(&[0xdead]).await;
    assert_eq!(
        result,
        Err(Error::Uds(fleetdiag::uds::error::Error::NegativeResponse(
            NegativeResponseCode::RequestOutOfRange
        )))
    );
}

#[tokio::test]
async fn fixed_width_layout_decodes_records() {
    let mut sim = SimEcu::default().with_did(0x4242, &[0x01, 0x02]);
    sim.fixed_width_records = Some(4);

    let mut client = connected_client(sim);
    client.set_did_layout(DidLayout::FixedWidth(4));

    let result = client.read_data_by_identifier(&[0x4242]).await.unwrap();
    assert_eq!(result[&0x4242], vec![0x01, 0x02, 0x00, 0x00]);
}

#[tokio::test]
async fn large_multi_did_request_is_segmented() {
    // 40 identifiers make the request span multiple frames
    let mut sim = SimEcu::default();
    let ids: Vec<u16> = (0x4000..0x4028).collect();
    for id in &ids {
        sim = sim.with_did(*id, &[*id as u8]);
    }

    let mut client = connected_client(sim);
    let result = client.read_data_by_identifier(&ids).await.unwrap();
    assert_eq!(result.len(), ids.len());
}

#[tokio::test]
async fn vin_readout_decodes_ascii() {
    let sim = SimEcu::default().with_vin("WVW123456789ABCDE");
    let mut client = connected_client(sim);

    let vin = client.get_vehicle_identification().await.unwrap();
    assert_eq!(vin.as_deref(), Some("WVW123456789ABCDE"));
}

#[tokio::test]
async fn security_access_unlocks_with_correct_key() {
    let mut client = connected_client(SimEcu::default());
    assert_eq!(client.security_level(), None);

    client.unlock(0x01, &XorSeedKey(0xff)).await.unwrap();
    assert_eq!(client.security_level(), Some(0x01));

    // Once unlocked the ECU hands out an all-zero seed
    let seed = client.security_access(0x01, None).await.unwrap();
    assert!(seed.iter().all(|&b| b == 0));
}

#[tokio::test]
async fn security_access_wrong_key_is_rejected() {
    let mut client = connected_client(SimEcu::default());

    let result = client.unlock(0x01, &XorSeedKey(0x42)).await;
    assert_eq!(
        result,
        Err(Error::Uds(fleetdiag::uds::error::Error::NegativeResponse(
            NegativeResponseCode::InvalidKey
        )))
    );
    assert_eq!(client.security_level(), None);
}

#[tokio::test]
async fn statistics_track_traffic() {
    let mut client = connected_client(SimEcu::default());

    client.tester_present(0x00).await.unwrap();
    let stats = client.statistics();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.frames_received, 1);
    assert!(stats.bytes_received > 0);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn bus_fault_surfaces_as_transport_error() {
    let mut client = connected_client(SimEcu::default());
    client.adapter_mut().fail_transmit = true;

    let result = client.read_dtc(0xff).await;
    assert_eq!(result, Err(Error::Transport("simulated bus fault".into())));
    assert_eq!(client.statistics().errors, 1);
}
