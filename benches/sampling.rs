// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Benchmarks for fault sampling and classification throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use setmask::delay_model::DelayModel;
use setmask::fault::{self, FaultCampaign, FaultConfig};
use setmask::netlist::{Netlist, OutputPorts};
use setmask::timing::TimingInfo;
use setmask::verilog;

fn full_adder() -> Netlist {
    let src = include_str!("../tests/fixtures/full_adder.vg");
    let mut nl = verilog::load_str(src, None, &OutputPorts::default()).unwrap();
    fault::prepare(&mut nl, &DelayModel::new(40)).unwrap();
    nl
}

fn bench_sampling(c: &mut Criterion) {
    let nl = full_adder();
    let timing = TimingInfo::from_ns(5.0, 0.1, 0.1).unwrap();
    let mut group = c.benchmark_group("fault_sampling");

    for num_faults in [1_000usize, 100_000, 1_000_000] {
        let config = FaultConfig::new(num_faults).with_seed(1);
        group.throughput(Throughput::Elements(num_faults as u64));
        let id = BenchmarkId::new("sample_and_classify", num_faults);
        group.bench_with_input(id, &config, |b, config| {
            b.iter(|| FaultCampaign::sample(black_box(&nl), &timing, config).unwrap().counts())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sampling);
criterion_main!(benches);
