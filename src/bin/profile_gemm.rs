//! GEMM profiling driver
//!
//! Profiles every host GEMM instance for one problem, then replays the
//! winner through the cached-selection dispatch path and reports timing
//! and effective bandwidth.
//!
//! ```text
//! profile_gemm [verify init time_kernel [M N K strideA strideB strideC [k_batch]]]
//! ```
//!
//! - `verify`: 0/1, compare the dispatched result against a naive reference
//! - `init`: 0 = zeros, 1 = small random integers, 2 = random decimals
//! - `time_kernel`: 0/1, time the final dispatch

use std::process::ExitCode;

use rand::Rng;

use elegir::host::{gemm_instances, host_buffer, read_back, HostAllocator};
use elegir::ops::gemm::{GemmBuffers, GemmProblem};
use elegir::{dispatch, select_best, SelectionCache, StreamConfig};

struct ExecutionConfig {
    do_verification: bool,
    init_method: u32,
    time_kernel: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            do_verification: true,
            init_method: 2,
            time_kernel: true,
        }
    }
}

fn print_usage(program: &str) {
    eprintln!(
        "usage: {program} [verify init time_kernel [M N K strideA strideB strideC [k_batch]]]"
    );
    eprintln!("  verify:      0 = off, 1 = compare against naive reference");
    eprintln!("  init:        0 = zeros, 1 = random integers, 2 = random decimals");
    eprintln!("  time_kernel: 0 = off, 1 = time the final dispatch");
}

fn parse_args(args: &[String]) -> Option<(ExecutionConfig, GemmProblem)> {
    let mut config = ExecutionConfig::default();
    let mut problem = GemmProblem::new(256, 1024, 512).with_k_batch(2);

    let parse = |s: &String| s.parse::<u32>().ok();

    match args.len() {
        0 => {}
        3 | 9 | 10 => {
            config.do_verification = parse(&args[0])? != 0;
            config.init_method = parse(&args[1])?;
            config.time_kernel = parse(&args[2])? != 0;
            if args.len() >= 9 {
                let dims: Vec<u32> = args[3..9].iter().map(parse).collect::<Option<_>>()?;
                problem = GemmProblem::new(dims[0], dims[1], dims[2])
                    .with_strides(dims[3], dims[4], dims[5]);
            }
            if args.len() == 10 {
                problem = problem.with_k_batch(parse(&args[9])?.max(1));
            }
        }
        _ => return None,
    }
    Some((config, problem))
}

fn fill(len: usize, init_method: u32) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    match init_method {
        0 => vec![0.0; len],
        1 => (0..len).map(|_| rng.gen_range(-5..=5) as f32).collect(),
        _ => (0..len).map(|_| rng.gen_range(-0.5..0.5)).collect(),
    }
}

fn reference_gemm(problem: &GemmProblem, a: &[f32], b: &[f32]) -> Vec<f32> {
    let (m, n, k) = (
        problem.m as usize,
        problem.n as usize,
        problem.k as usize,
    );
    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        for j in 0..n {
            for l in 0..k {
                c[i * n + j] +=
                    a[i * problem.stride_a as usize + l] * b[l * problem.stride_b as usize + j];
            }
        }
    }
    c
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let Some((config, problem)) = parse_args(&args[1..]) else {
        print_usage(&args[0]);
        return ExitCode::FAILURE;
    };

    let a = fill(
        (problem.m.max(1) - 1) as usize * problem.stride_a as usize + problem.k as usize,
        config.init_method,
    );
    let b = fill(
        (problem.k.max(1) - 1) as usize * problem.stride_b as usize + problem.n as usize,
        config.init_method,
    );
    let c_len = (problem.m.max(1) - 1) as usize * problem.stride_c as usize + problem.n as usize;

    let buffers = GemmBuffers {
        a: host_buffer(a.clone()),
        b: host_buffer(b.clone()),
        c: host_buffer(vec![0.0; c_len]),
    };

    let registry = gemm_instances::<f32>();
    let allocator = HostAllocator::new();
    let mut cache = SelectionCache::new();

    println!(
        "problem: {}x{}x{} (k_batch {}), running all instances with timing",
        problem.m, problem.n, problem.k, problem.k_batch
    );

    let selection = match select_best(&registry, &problem, &buffers, &allocator) {
        Ok(Some(selection)) => selection,
        Ok(None) => {
            println!("no supported instance found");
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            eprintln!("selection failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    println!(
        "best instance: {} (index {}, {:.4} ms)",
        selection.id, selection.index, selection.elapsed_ms
    );
    cache.store(selection);

    let stream = StreamConfig {
        time_kernel: config.time_kernel,
        blocking: true,
    };
    let Some(selection) = cache.get() else {
        return ExitCode::FAILURE;
    };
    let report = match dispatch(&registry, selection, &problem, &buffers, &allocator, &stream) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("dispatch failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    match (report.elapsed_ms, report.gb_per_sec()) {
        (Some(ms), Some(gb)) => println!(
            "kernel execution time: {ms:.4} ms, effective data transfer bandwidth: {gb:.2} GB/s"
        ),
        _ => println!("dispatch completed (untimed)"),
    }

    if config.do_verification {
        let expected = reference_gemm(&problem, &a, &b);
        let got = read_back(&buffers.c).unwrap_or_default();
        let mismatch = expected.iter().enumerate().find(|(i, e)| {
            let j = (i / problem.n as usize) * problem.stride_c as usize + i % problem.n as usize;
            got.get(j).is_none_or(|g| (*g - **e).abs() > 1e-2)
        });
        if let Some((i, _)) = mismatch {
            eprintln!("verification FAILED at element {i}");
            return ExitCode::FAILURE;
        }
        println!("verification passed");
    }

    ExitCode::SUCCESS
}
