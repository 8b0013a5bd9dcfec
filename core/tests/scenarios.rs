//! End-to-end voting scenarios driven through `CpasDevice`.

mod common;

use common::{rig, BusCall};
use cpas_core::config::{LeafDesc, MnocDesc, NiuDesc, NodeDesc};
use cpas_core::drv::{MIN_MNOC_AB, MIN_MNOC_IB};
use cpas_core::smart_qos::SmartQosTunables;
use cpas_core::vote::{DrvIndex, DrvLevel, LaneBw};
use cpas_core::{AhbVote, AxiVote, BandwidthVote, CpasConfig, CpasFeatures, Lane, PathVote};
use cpas_hal::{BusPath, VoteLevel};

const SVS: AhbVote = AhbVote::Absolute(VoteLevel::Svs);

/// Root `R` with one leaf `L1` for ife0 path 3, write
fn two_level() -> CpasConfig {
    CpasConfig::new(["ife0"])
        .node(
            NodeDesc::new(0, 0, "R")
                .mnoc(MnocDesc::new(["cam_hf_0"]).rt())
                .camnoc_port("camnoc_hf"),
        )
        .node(NodeDesc::new(1, 1, "L1").parent(0).leaf(LeafDesc::new("ife0", 3, 1)))
}

#[test]
fn start_propagates_leaf_vote_to_root_port() {
    let r = rig(two_level());
    let h = r.dev.register_client("ife0", 0).unwrap();

    r.dev
        .start(h, SVS, &AxiVote::single(PathVote::new(3, 1, 1000, 2000, 2000)))
        .unwrap();

    let expected = BandwidthVote::Hlos(LaneBw::new(2000, 2000, 1000));
    {
        let engine = r.dev.engine();
        assert_eq!(engine.tree().get(1).unwrap().bw_info[0], expected);
        assert_eq!(engine.tree().get(0).unwrap().bw_info[0], expected);

        let port = &engine.axi_ports()[0];
        assert_eq!(port.current_bw.primary().ab, 2000);
        assert_eq!(port.applied_bw.primary().ab, MIN_MNOC_AB);
        assert_eq!(port.applied_bw.primary().ib, MIN_MNOC_IB);
    }

    assert_eq!(
        r.rec.lock().last_vote("cam_hf_0"),
        Some(BusCall {
            port: "cam_hf_0".to_string(),
            ab: MIN_MNOC_AB,
            ib: MIN_MNOC_IB,
            path: BusPath::Hlos,
        })
    );
}

#[test]
fn stop_returns_tree_and_port_to_zero() {
    let r = rig(two_level());
    let h = r.dev.register_client("ife0", 0).unwrap();
    r.dev
        .start(h, SVS, &AxiVote::single(PathVote::new(3, 1, 1000, 2000, 2000)))
        .unwrap();

    let td = r.dev.stop(h).unwrap();
    assert!(td.is_clean(), "{:?}", td.errors);

    {
        let engine = r.dev.engine();
        assert_eq!(engine.tree().get(1).unwrap().bw_info[0].primary(), LaneBw::ZERO);
        assert_eq!(engine.tree().get(0).unwrap().bw_info[0].primary(), LaneBw::ZERO);
        assert!(engine.axi_ports()[0].applied_is_zero());
        assert!(engine.validate_stop_bw());
    }

    let last = r.rec.lock().last_vote("cam_hf_0").unwrap();
    assert_eq!((last.ab, last.ib), (0, 0));
}

fn drv_config() -> CpasConfig {
    CpasConfig::new(["sfe0"])
        .features(CpasFeatures::DDR_DRV | CpasFeatures::CLK_DRV)
        .node(NodeDesc::new(0, 0, "root").mnoc(MnocDesc::new(["cam_hf", "cam_hf_drv0"]).rt()))
        .node(
            NodeDesc::new(1, 1, "sfe_wr")
                .parent(0)
                .leaf(LeafDesc::new("sfe0", 0, 1).drv(DrvIndex::Fixed(Lane::Drv0))),
        )
}

#[test]
fn drv_high_vote_clears_low_and_runs_channel() {
    let r = rig(drv_config());
    let h = r.dev.register_client("sfe0", 0).unwrap();

    let low = PathVote::new(0, 1, 200, 3_000_000, 3_000_000).at_level(DrvLevel::Low);
    r.dev.start(h, SVS, &AxiVote::single(low)).unwrap();

    let high = PathVote::new(0, 1, 500, 4_000_000, 4_000_000).at_level(DrvLevel::High);
    r.dev.update_axi_vote(h, &AxiVote::single(high)).unwrap();

    {
        let engine = r.dev.engine();
        let lane = engine.tree().get(1).unwrap().bw_info[Lane::Drv0.index()];
        assert_eq!(lane.slot(DrvLevel::High).camnoc, 500);
        assert_eq!(lane.slot(DrvLevel::Low).camnoc, 0);
        assert_eq!(lane.slot(DrvLevel::Low).ab, 0);

        let port = &engine.axi_ports()[1];
        assert!(port.is_drv());
        assert!(port.drv_channel_started);
        assert_eq!(port.current_bw.slot(DrvLevel::High).ab, 4_000_000);
    }

    {
        let rec = r.rec.lock();
        assert_eq!(rec.rsc, [(0, "start"), (0, "switch")]);
        assert!(rec
            .votes_on("cam_hf_drv0")
            .iter()
            .any(|c| c.path == BusPath::DrvHigh && c.ab == 4_000_000));
    }

    let td = r.dev.stop(h).unwrap();
    assert!(td.is_clean(), "{:?}", td.errors);
    assert_eq!(r.rec.lock().rsc.last(), Some(&(0, "stop")));
    assert!(!r.dev.engine().axi_ports()[1].drv_channel_started);
}

fn alias_config() -> CpasConfig {
    CpasConfig::new(["ife0", "ipe0"])
        .node(NodeDesc::new(0, 0, "root").mnoc(MnocDesc::new(["cam_sf_0"])))
        .node(
            NodeDesc::new(1, 1, "ipe_rd")
                .parent(0)
                .leaf(LeafDesc::new("ipe0", 64, 0).constituents([1, 2])),
        )
}

#[test]
fn alias_path_lands_on_aggregate_leaf() {
    let r = rig(alias_config());
    let h = r.dev.register_client("ipe0", 0).unwrap();
    let vote = AxiVote::single(PathVote::new(1, 0, 10, 20, 30));

    {
        let client = r.dev.registry().lock(h).unwrap();
        let out = r.dev.engine().consolidate(h, &client, &vote).unwrap();
        assert_eq!(out.paths, [PathVote::new(32, 0, 10, 20, 30)]);
    }

    r.dev.start(h, SVS, &vote).unwrap();
    assert_eq!(
        r.dev.engine().tree().get(1).unwrap().bw_info[0],
        BandwidthVote::Hlos(LaneBw::new(20, 30, 10))
    );
}

fn qos_config() -> CpasConfig {
    let niu = |low, high| NiuDesc {
        priority_lut_low_offset: low,
        priority_lut_high_offset: high,
        niu_size: 4,
    };
    let mut cfg = CpasConfig::new(["ife0", "ife1"])
        .features(CpasFeatures::SMART_QOS)
        .node(NodeDesc::new(0, 0, "root").mnoc(MnocDesc::new(["cam_hf_0"]).rt()))
        .node(NodeDesc::new(1, 1, "rt_wr_0").parent(0).rt_wr_niu(niu(0x10, 0x14)))
        .node(NodeDesc::new(2, 1, "rt_wr_1").parent(0).rt_wr_niu(niu(0x20, 0x24)))
        .node(NodeDesc::new(3, 2, "ife0_wr").parent(1).leaf(LeafDesc::new("ife0", 0, 1)))
        .node(NodeDesc::new(4, 2, "ife1_wr").parent(2).leaf(LeafDesc::new("ife1", 0, 1)));
    cfg.smart_qos = SmartQosTunables {
        priority_min: 3,
        priority_max: 6,
        priority_clamp: 7,
        slope_factor: 100,
        lowstress_th: 20,
        highstress_th: 80,
        moststressed_clamp_th: 6,
        leaststressed_clamp_th: 12,
        bw_ratio_scale_factor: 1,
    };
    cfg
}

#[test]
fn smart_qos_idle_when_rt_camnoc_is_zero() {
    let r = rig(qos_config());
    let h = r.dev.register_client("ife0", 0).unwrap();

    r.dev
        .start(h, SVS, &AxiVote::single(PathVote::new(0, 1, 0, 5_000_000, 5_000_000)))
        .unwrap();

    assert_eq!(r.camnoc_rt.write_count(), 0);
    {
        let engine = r.dev.engine();
        for cell in [1, 2] {
            let niu = engine.tree().get(cell).unwrap().niu.unwrap();
            assert_eq!((niu.applied_priority_low, niu.applied_priority_high), (0, 0));
        }
    }

    r.dev
        .update_axi_vote(h, &AxiVote::single(PathVote::new(0, 1, 4000, 5_000_000, 5_000_000)))
        .unwrap();
    assert!(r.camnoc_rt.write_count() > 0);

    let niu = r.dev.engine().tree().get(1).unwrap().niu.unwrap();
    assert_ne!(niu.applied_priority_high, 0);
    assert_eq!(niu.applied_priority_low, niu.curr_priority_low);
}
