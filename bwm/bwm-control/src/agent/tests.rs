// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use super::*;
use bwm_core::{
    event,
    ids::{FlowId, TenantId},
    inet::ExplicitCongestionNotification,
    random::testing::Generator,
    tags::{FlowIdTag, TenantIdTag},
};

const GBPS: u64 = 1_000_000_000;

fn addr(host: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, host)
}

fn coordinator(tenants: &[u32]) -> Coordinator {
    let mut config = String::new();
    for tenant in tenants {
        config.push_str(&format!("{tenant}\n0,0 10,1000000000\n\n"));
    }
    let mut coordinator = Coordinator::default();
    coordinator.load_tenants(config.as_bytes()).unwrap();
    coordinator
}

fn agent() -> LocalAgent {
    LocalAgent::builder(addr(1), DataRate::from_bps(GBPS)).build()
}

fn data(tenant: u32, trace: u32, dst: u8) -> Packet {
    Packet::data(addr(1), addr(dst), 1000)
        .with_tenant(TenantIdTag(TenantId(tenant)))
        .with_flow(FlowIdTag(TraceId(trace)))
}

fn now_ms(ms: u64) -> Timestamp {
    Timestamp::from_duration(Duration::from_millis(ms))
}

/// Admits a flow by pushing its first packet through the queue disc
fn admit(
    agent: &mut LocalAgent,
    coordinator: &mut Coordinator,
    qdisc: &mut BwmQueueDisc,
    packet: Packet,
) {
    let mut rng = Generator::default();
    let outcome = qdisc.enqueue(
        packet,
        &mut Admitter { agent, coordinator },
        &mut rng,
    );
    assert!(matches!(
        outcome.result,
        bwm_core::qdisc::bwm::EnqueueResult::Queued(_)
    ));
}

#[test]
fn first_flow_starts_at_a_tenth_of_the_device() {
    let mut coordinator = coordinator(&[1]);
    let mut agent = agent();
    let mut qdisc = BwmQueueDisc::new(DataRate::from_bps(GBPS));

    agent.register(&mut coordinator);
    admit(&mut agent, &mut coordinator, &mut qdisc, data(1, 100, 2));

    assert_eq!(agent.flows.len(), 1);
    let class = qdisc.class(agent.flows[0].class).unwrap();
    assert_eq!(class.rate(), DataRate::from_bps(GBPS / 10));
}

#[test]
fn siblings_fund_later_flows_of_the_same_tenant() {
    let mut coordinator = coordinator(&[1]);
    let mut agent = agent();
    let mut qdisc = BwmQueueDisc::new(DataRate::from_bps(GBPS));

    agent.register(&mut coordinator);
    admit(&mut agent, &mut coordinator, &mut qdisc, data(1, 100, 2));
    admit(&mut agent, &mut coordinator, &mut qdisc, data(1, 101, 3));

    // the newcomer takes the sibling average; the sibling is expropriated
    // down to the same level
    let first = qdisc.class(agent.flows[0].class).unwrap().rate();
    let second = qdisc.class(agent.flows[1].class).unwrap().rate();
    assert_eq!(first, DataRate::from_bps(GBPS / 20));
    assert_eq!(second, DataRate::from_bps(GBPS / 20));
}

#[test]
fn expropriation_is_floored() {
    let mut agent = agent();

    let request = |flow: u32, class: usize| AdmissionRequest {
        tenant_id: TenantId(1),
        flow_id: FlowId(flow),
        trace_id: TraceId(flow),
        class: ClassIndex(class),
        src: addr(1),
        dst: addr(2),
    };

    agent.fund_new_flow(&request(1, 1));
    // shrink the sibling close to the floor of device/100
    agent.flows[0].last_rate = DataRate::from_bps(GBPS / 80);

    let verdict = agent.fund_new_flow(&request(2, 2));
    let AdmissionVerdict::Admit { sibling_rates, .. } = verdict else {
        panic!("expected admission");
    };

    // half of device/80 would leave device/160, below the floor
    assert_eq!(sibling_rates, [(ClassIndex(1), DataRate::from_bps(GBPS / 100))]);
}

#[test]
fn unknown_tenants_are_rejected_at_admission() {
    let mut coordinator = coordinator(&[1]);
    let mut agent = agent();
    let mut qdisc = BwmQueueDisc::new(DataRate::from_bps(GBPS));
    let mut rng = Generator::default();

    agent.register(&mut coordinator);
    let outcome = qdisc.enqueue(
        data(9, 100, 2),
        &mut Admitter {
            agent: &mut agent,
            coordinator: &mut coordinator,
        },
        &mut rng,
    );

    assert_eq!(
        outcome.result,
        bwm_core::qdisc::bwm::EnqueueResult::DroppedUnregistered
    );
    assert!(agent.flows.is_empty());
}

#[test]
fn tuner_follows_the_coordinator_target() {
    let mut coordinator = coordinator(&[1]);
    let mut agent = agent();
    let mut qdisc = BwmQueueDisc::new(DataRate::from_bps(GBPS));

    agent.register(&mut coordinator);
    admit(&mut agent, &mut coordinator, &mut qdisc, data(1, 100, 2));

    agent.set_target_fair_share(5.0);
    agent.tune(&mut coordinator, &mut qdisc, now_ms(1), &mut event::Disabled);

    let flow = coordinator.flow(agent.flows[0].key).unwrap();
    // floored at 10, one dampened step toward the target
    assert!((flow.allocated_fs() - 9.75).abs() < 1e-9);

    // the single-flow transformation maps fair share 10 to the full device,
    // so 9.75 entitles 975Mbps (modulo float truncation)
    let class = qdisc.class(agent.flows[0].class).unwrap();
    let rate = class.rate().as_f64();
    assert!((rate - 975_000_000.0).abs() < 10.0);
}

#[test]
fn device_ceiling_scales_rates_down() {
    let mut coordinator = coordinator(&[1, 2]);
    let mut agent = agent();
    let mut qdisc = BwmQueueDisc::new(DataRate::from_bps(GBPS));

    agent.register(&mut coordinator);
    admit(&mut agent, &mut coordinator, &mut qdisc, data(1, 100, 2));
    admit(&mut agent, &mut coordinator, &mut qdisc, data(2, 200, 2));

    agent.set_target_fair_share(20.0);
    for tick in 1..=4 {
        agent.tune(
            &mut coordinator,
            &mut qdisc,
            now_ms(tick),
            &mut event::Disabled,
        );

        // invariant: the summed class rates never exceed the device limit
        let total: u64 = agent
            .flows
            .iter()
            .map(|entry| qdisc.class(entry.class).unwrap().rate().bits_per_sec())
            .sum();
        assert!(total <= GBPS);
    }

    assert!(agent.rate_limited);
    let first = qdisc.class(agent.flows[0].class).unwrap().rate();
    let second = qdisc.class(agent.flows[1].class).unwrap().rate();
    assert_eq!(first, DataRate::from_bps(GBPS / 2));
    assert_eq!(second, DataRate::from_bps(GBPS / 2));
}

#[test]
fn idle_ticks_leave_class_rates_alone() {
    let mut coordinator = coordinator(&[1]);
    let mut agent = agent();
    let mut qdisc = BwmQueueDisc::new(DataRate::from_bps(GBPS));

    agent.register(&mut coordinator);
    admit(&mut agent, &mut coordinator, &mut qdisc, data(1, 100, 2));

    // CAWC enabled, no congestion, no usage: no branch applies
    agent.cawc_enabled = true;
    let before = qdisc.class(agent.flows[0].class).unwrap().rate();
    agent.tune(&mut coordinator, &mut qdisc, now_ms(1), &mut event::Disabled);

    assert_eq!(qdisc.class(agent.flows[0].class).unwrap().rate(), before);
    assert!(!agent.rate_limited);
}

#[test]
fn cawc_expands_uncongested_working_flows() {
    let mut coordinator = coordinator(&[1]);
    let mut agent = agent();
    let mut qdisc = BwmQueueDisc::new(DataRate::from_bps(GBPS));

    agent.register(&mut coordinator);
    admit(&mut agent, &mut coordinator, &mut qdisc, data(1, 100, 2));

    agent.cawc_enabled = true;
    let key = agent.flows[0].key;
    coordinator.flow_mut(key).unwrap().set_usage(100_000_000.0);

    agent.set_target_fair_share(3.0);
    agent.tune(&mut coordinator, &mut qdisc, now_ms(1), &mut event::Disabled);

    // report/tune = 5: the share grows by 20% per tick instead of tracking
    // the (much lower) target
    let flow = coordinator.flow(key).unwrap();
    assert!((flow.allocated_fs() - 12.0).abs() < 1e-9);

    // once the network reports congestion the flow falls back to the target
    coordinator.flow_mut(key).unwrap().set_congestion_factor(0.5);
    agent.tune(&mut coordinator, &mut qdisc, now_ms(2), &mut event::Disabled);
    let fair_share = coordinator.flow(key).unwrap().allocated_fs();
    assert!(fair_share < 12.0);
}

#[test]
fn reporter_converts_bytes_to_bits_per_second() {
    let mut coordinator = coordinator(&[1]);
    let mut agent = agent();
    let mut qdisc = BwmQueueDisc::new(DataRate::from_bps(GBPS));

    agent.register(&mut coordinator);
    admit(&mut agent, &mut coordinator, &mut qdisc, data(1, 100, 2));

    // one 1020-byte packet leaves the class before the report
    let (_, class) = qdisc.dequeue(now_ms(1)).unwrap();
    assert_eq!(class, agent.flows[0].class);

    agent.report(&mut coordinator, &mut qdisc, now_ms(5), &mut event::Disabled);

    let flow = coordinator.flow(agent.flows[0].key).unwrap();
    // 1020 bytes over the 5ms window
    assert!((flow.usage() - 1020.0 * 8.0 * 1000.0 / 5.0).abs() < 1e-9);

    // counters reset for the next window
    assert_eq!(
        qdisc.class(agent.flows[0].class).unwrap().usage_bytes(),
        0
    );

    // the coordinator's answer was stored as the new target
    assert!(agent.target_fair_share() > 0.0);
}

#[test]
fn receive_side_samples_and_answers_with_feedback() {
    let mut coordinator = Coordinator::default();
    // the receiving host's agent has no local flows
    let mut agent = LocalAgent::builder(addr(2), DataRate::from_bps(GBPS)).build();

    let mut feedback = None;
    for index in 0..50 {
        let mut packet = Packet::data(addr(1), addr(2), 1000).with_flow(FlowIdTag(TraceId(9)));
        if index >= 40 {
            packet.set_ecn(ExplicitCongestionNotification::Ce);
        }

        let answer = agent.on_receive(&mut coordinator, &packet, now_ms(index));
        if index < 49 {
            assert!(answer.is_none());
        } else {
            feedback = answer;
        }
    }

    // 10 of 50 equally sized packets were marked
    let feedback = feedback.expect("the 50th sample triggers feedback");
    assert!(cawc::is_feedback(&feedback));
    assert_eq!(feedback.dst(), addr(1));
    assert_eq!(feedback.tags.flow_id, Some(FlowIdTag(TraceId(9))));
    let factor = cawc::decode_factor(feedback.payload()).unwrap();
    assert!((factor - 0.2).abs() < 2f32.powi(-20));

    // the sample counters were reset
    let entry = agent.scoreboard.get(&TraceId(9)).unwrap();
    assert_eq!((entry.spc, entry.ceb, entry.nmb), (0, 0, 0));
}

#[test]
fn feedback_updates_the_matching_flow() {
    let mut coordinator = coordinator(&[1]);
    let mut agent = agent();
    let mut qdisc = BwmQueueDisc::new(DataRate::from_bps(GBPS));

    agent.register(&mut coordinator);
    admit(&mut agent, &mut coordinator, &mut qdisc, data(1, 100, 2));

    let feedback = cawc::feedback_packet(addr(2), addr(1), TraceId(100), 0.4);
    assert!(agent
        .on_receive(&mut coordinator, &feedback, now_ms(1))
        .is_none());

    let flow = coordinator.flow(agent.flows[0].key).unwrap();
    assert!((flow.congestion_factor() - 0.4).abs() < 1e-6);
}

#[test]
fn sweeper_expires_stale_entries() {
    let mut coordinator = Coordinator::default();
    let mut agent = LocalAgent::builder(addr(2), DataRate::from_bps(GBPS)).build();

    let packet = Packet::data(addr(1), addr(2), 1000).with_flow(FlowIdTag(TraceId(9)));
    agent.on_receive(&mut coordinator, &packet, now_ms(1));

    // idle past the feedback cycle: samples are cleared, nothing is sent
    let feedback = agent.sweep_scoreboard(now_ms(10));
    assert!(feedback.is_empty());
    let entry = agent.scoreboard.get(&TraceId(9)).unwrap();
    assert_eq!((entry.spc, entry.ceb, entry.nmb), (0, 0, 0));
}

#[test]
fn sweeper_flushes_slow_flows() {
    let mut coordinator = Coordinator::default();
    let mut agent = LocalAgent::builder(addr(2), DataRate::from_bps(GBPS)).build();

    // 11 samples: under the packet threshold of 50, but over the sweeper's
    // 20% mark
    for index in 0..11 {
        let packet = Packet::data(addr(1), addr(2), 1000).with_flow(FlowIdTag(TraceId(9)));
        assert!(agent
            .on_receive(&mut coordinator, &packet, now_ms(index))
            .is_none());
    }

    let feedback = agent.sweep_scoreboard(now_ms(10));
    assert_eq!(feedback.len(), 1);
    assert_eq!(feedback[0].dst(), addr(1));

    // only the packet counter resets on the sweeper path
    let entry = agent.scoreboard.get(&TraceId(9)).unwrap();
    assert_eq!(entry.spc, 0);
    assert!(entry.nmb > 0);

    // with no new samples the next sweep stays quiet
    let feedback = agent.sweep_scoreboard(now_ms(10));
    assert!(feedback.is_empty());
}
