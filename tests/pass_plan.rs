use latex_snap::{
    CompileRequest, FailureKind,
    config::Config,
    engine::Tool,
    plan::{PassPlan, ResolvedTools},
};
use std::path::PathBuf;

fn tools(list: &[Tool]) -> ResolvedTools {
    list.iter()
        .map(|&t| (t, PathBuf::from(format!("/usr/bin/{}", t.name()))))
        .collect()
}

#[test]
fn default_plan_uses_everything_installed() {
    let cfg = Config::default();
    let all = tools(&Tool::ALL);
    let plan = PassPlan::new(&cfg, &CompileRequest::new("x"), &all).unwrap();
    assert_eq!(plan.passes, 1);
    assert_eq!(plan.bibliography, None);
    assert_eq!(plan.converters, vec![Tool::Pdftoppm, Tool::Magick]);
    assert!(plan.crop);
    assert_eq!(plan.trim_with, Some(Tool::Magick));
}

#[test]
fn converter_preference_and_convert_fallback() {
    let mut cfg = Config::default();
    cfg.render.prefer_pdftoppm = false;
    let installed = tools(&[Tool::Latex, Tool::Pdftoppm, Tool::Convert]);
    let plan = PassPlan::new(&cfg, &CompileRequest::new("x"), &installed).unwrap();
    assert_eq!(plan.converters, vec![Tool::Convert, Tool::Pdftoppm]);
    assert_eq!(plan.trim_with, Some(Tool::Convert));
    assert!(!plan.crop);
}

#[test]
fn passes_are_clamped() {
    let cfg = Config::default();
    let installed = tools(&[Tool::Latex, Tool::Pdftoppm]);
    let mut req = CompileRequest::new("x");
    req.passes = 99;
    assert_eq!(PassPlan::new(&cfg, &req, &installed).unwrap().passes, 3);

    req.passes = 0;
    let err = PassPlan::new(&cfg, &req, &installed).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Validation);
}

#[test]
fn bibliography_needs_a_second_pass() {
    let cfg = Config::default();
    let installed = tools(&[Tool::Latex, Tool::Bibtex, Tool::Pdftoppm]);
    let mut req = CompileRequest::new("x");
    req.bib_entries = Some("@misc{a, title={A}}".into());

    let plan = PassPlan::new(&cfg, &req, &installed).unwrap();
    assert_eq!(plan.bibliography, Some(Tool::Bibtex));
    assert_eq!(plan.passes, 2);
    assert!(!plan.bibliography_unavailable);

    req.use_biblatex = true;
    let plan = PassPlan::new(&cfg, &req, &installed).unwrap();
    assert_eq!(plan.bibliography, None);
    assert!(plan.bibliography_unavailable);
    assert_eq!(plan.passes, 1);
}

#[test]
fn bibliography_respects_max_passes() {
    let mut cfg = Config::default();
    cfg.limits.max_passes = 1;
    let installed = tools(&[Tool::Latex, Tool::Bibtex, Tool::Pdftoppm]);
    let mut req = CompileRequest::new("x");
    req.bib_entries = Some("@misc{a, title={A}}".into());
    assert_eq!(PassPlan::new(&cfg, &req, &installed).unwrap().passes, 1);
}

#[test]
fn missing_engine_or_converters() {
    let cfg = Config::default();
    let req = CompileRequest::new("x");

    let err = PassPlan::new(&cfg, &req, &tools(&[Tool::Pdftoppm])).unwrap_err();
    assert_eq!(err.kind(), FailureKind::ToolMissing);
    assert!(err.to_string().contains("latex"));

    let err = PassPlan::new(&cfg, &req, &tools(&[Tool::Latex, Tool::Pdfcrop])).unwrap_err();
    assert_eq!(err.kind(), FailureKind::ToolMissing);
    assert!(err.to_string().contains("pdftoppm"));
}
