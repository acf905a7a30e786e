//! Integration tests driving the full scheduling pipeline.

use tilefuse::prelude::*;
use tilefuse::{generate_schedule, MachineParams};

/// Capture the scheduler's log output when a test runs with RUST_LOG set.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A producer shared by two consumers: A(x) = x * 2 feeds both outputs.
fn shared_producer() -> Pipeline {
    let a = Function::pure(
        "A",
        &["x"],
        Expr::var("x") * Expr::int(2),
        ScalarType::Int32,
    );
    let b = Function::pure(
        "B",
        &["x"],
        Expr::call("A", ScalarType::Int32, vec![Expr::var("x")]) + Expr::int(1),
        ScalarType::Int32,
    )
    .with_estimate("x", 0, 100);
    let c = Function::pure(
        "C",
        &["x"],
        Expr::call("A", ScalarType::Int32, vec![Expr::var("x")]) - Expr::int(1),
        ScalarType::Int32,
    )
    .with_estimate("x", 0, 100);
    Pipeline::new(vec![a, b, c], vec!["B".to_string(), "C".to_string()]).expect("valid pipeline")
}

/// Separable 3-tap blur over an input image.
fn blur() -> Pipeline {
    let tap = |dx: i64, dy: i64| {
        Expr::image(
            "in",
            ScalarType::Int32,
            vec![Expr::var("x") + Expr::int(dx), Expr::var("y") + Expr::int(dy)],
        )
    };
    let blur_x = Function::pure(
        "blur_x",
        &["x", "y"],
        (tap(-1, 0) + tap(0, 0) + tap(1, 0)) / Expr::int(3),
        ScalarType::Int32,
    );

    let bx = |dx: i64, dy: i64| {
        Expr::call(
            "blur_x",
            ScalarType::Int32,
            vec![Expr::var("x") + Expr::int(dx), Expr::var("y") + Expr::int(dy)],
        )
    };
    let blur_y = Function::pure(
        "blur_y",
        &["x", "y"],
        (bx(0, -1) + bx(0, 0) + bx(0, 1)) / Expr::int(3),
        ScalarType::Int32,
    )
    .with_estimate("x", 0, 1536)
    .with_estimate("y", 0, 2560);

    Pipeline::new(vec![blur_x, blur_y], vec!["blur_y".to_string()]).expect("valid pipeline")
}

fn count(schedule: &Schedule, pred: impl Fn(&Directive) -> bool) -> usize {
    schedule.directives.iter().filter(|d| pred(d)).count()
}

#[test]
fn test_cheap_producer_inlined_into_all_consumers() {
    init_logging();
    let p = shared_producer();
    let schedule = generate_schedule(&p, MachineParams::default()).expect("schedules");

    // A is cheap enough to recompute in both consumers
    assert_eq!(
        count(&schedule, |d| matches!(d, Directive::ComputeInline { func } if func == "A")),
        1
    );
    assert_eq!(
        count(&schedule, |d| matches!(d, Directive::ComputeRoot { func } if func == "A")),
        0
    );
    for out in ["B", "C"] {
        assert_eq!(
            count(&schedule, |d| matches!(d, Directive::ComputeRoot { func } if func == out)),
            1
        );
    }
}

#[test]
fn test_outputs_are_vectorized_and_parallelized() {
    init_logging();
    let p = shared_producer();
    let schedule = generate_schedule(&p, MachineParams::default()).expect("schedules");

    for out in ["B", "C"] {
        assert!(schedule
            .for_func(out)
            .any(|d| matches!(d, Directive::Vectorize { .. })));
        assert!(schedule
            .for_func(out)
            .any(|d| matches!(d, Directive::Parallel { .. })));
    }
}

#[test]
fn test_blur_keeps_expensive_producer_materialized() {
    init_logging();
    let p = blur();
    let schedule = generate_schedule(&p, MachineParams::default()).expect("schedules");

    // Inlining blur_x would triple its work inside blur_y
    assert_eq!(
        count(&schedule, |d| matches!(d, Directive::ComputeInline { .. })),
        0
    );
    for f in ["blur_x", "blur_y"] {
        assert_eq!(
            count(&schedule, |d| matches!(d, Directive::ComputeRoot { func } if func == f)),
            1
        );
        assert!(schedule
            .for_func(f)
            .any(|d| matches!(d, Directive::Vectorize { .. })));
    }

    // The outermost dimension carries the parallelism
    assert!(schedule.for_func("blur_y").any(
        |d| matches!(d, Directive::Parallel { var, .. } if var == "y")
    ));
}

#[test]
fn test_directive_order_split_reorder_vectorize() {
    init_logging();
    // An iterative stage whose working set outgrows fast memory, so the
    // tile search picks a real tiling for the update
    let update = Definition {
        args: vec![Expr::var("x")],
        values: vec![
            Expr::call("F", ScalarType::Int32, vec![Expr::var("x")]) + Expr::int(1),
        ],
        dims: vec!["x".to_string()],
        rvars: Vec::new(),
    };
    let f = Function::pure("F", &["x"], Expr::var("x"), ScalarType::Int32)
        .with_update(update)
        .with_estimate("x", 0, 2048);
    let p = Pipeline::new(vec![f], vec!["F".to_string()]).expect("valid pipeline");

    let schedule = generate_schedule(&p, MachineParams::default()).expect("schedules");

    // The update stage is selected, tiled, reordered and vectorized in
    // that order
    let idx = |pred: &dyn Fn(&Directive) -> bool| {
        schedule
            .directives
            .iter()
            .position(pred)
            .expect("directive present")
    };
    let update_idx = idx(&|d| matches!(d, Directive::Update { func, index } if func == "F" && *index == 0));
    let split = idx(&|d| {
        matches!(d, Directive::Split { func, stage, var, .. }
                 if func == "F" && *stage == 1 && var == "x")
    });
    let reorder = idx(&|d| matches!(d, Directive::Reorder { func, stage, .. } if func == "F" && *stage == 1));
    let vectorize = idx(&|d| matches!(d, Directive::Vectorize { func, stage, .. } if func == "F" && *stage == 1));
    assert!(update_idx < split);
    assert!(split < reorder);
    assert!(reorder < vectorize);

    // The tile shrinks the working set to the fast-memory budget:
    // 256 elements at 4 bytes
    assert!(schedule.directives.iter().any(|d| {
        matches!(d, Directive::Split { func, stage, factor, .. }
                 if func == "F" && *stage == 1 && *factor == 256)
    }));
}

#[test]
fn test_missing_estimate_is_rejected() {
    init_logging();
    let f = Function::pure("F", &["x"], Expr::var("x") + Expr::int(1), ScalarType::Int32);
    let p = Pipeline::new(vec![f], vec!["F".to_string()]).expect("valid pipeline");

    let err = generate_schedule(&p, MachineParams::default()).expect_err("must fail");
    match err.downcast_ref::<SchedError>() {
        Some(SchedError::MissingEstimate { func, var }) => {
            assert_eq!(func, "F");
            assert_eq!(var, "x");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_schedule_serde_round_trip() {
    init_logging();
    let p = blur();
    let schedule = generate_schedule(&p, MachineParams::default()).expect("schedules");

    let json = serde_json::to_string(&schedule).expect("serializes");
    let back: Schedule = serde_json::from_str(&json).expect("deserializes");
    assert_eq!(schedule, back);
}

#[test]
fn test_schedule_display_is_statement_per_line() {
    init_logging();
    let p = shared_producer();
    let schedule = generate_schedule(&p, MachineParams::default()).expect("schedules");

    let text = format!("{}", schedule);
    assert_eq!(text.lines().count(), schedule.directives.len());
    for line in text.lines() {
        assert!(line.ends_with(';'), "not a statement: {}", line);
    }
}

#[test]
fn test_schedule_is_deterministic() {
    init_logging();
    let p = blur();
    let a = generate_schedule(&p, MachineParams::default()).expect("schedules");
    let b = generate_schedule(&p, MachineParams::default()).expect("schedules");
    assert_eq!(a, b);
}
