use latex_snap::{
    CompileRequest, FailureKind,
    assemble::{assemble, assemble_request},
    config::{BASE_PREAMBLE, Config},
};

#[test]
fn wraps_body_in_exactly_one_document_environment() {
    let cfg = Config::default();
    let src = assemble(&cfg, "Hello \\textbf{World}", "", true).unwrap();
    assert!(src.starts_with(BASE_PREAMBLE));
    assert_eq!(src.matches("\\begin{document}").count(), 1);
    assert_eq!(src.matches("\\end{document}").count(), 1);
    let begin = src.find("\\begin{document}").unwrap();
    let body = src.find("Hello \\textbf{World}").unwrap();
    let end = src.find("\\end{document}").unwrap();
    assert!(begin < body && body < end);
}

#[test]
fn preamble_extra_goes_between_base_and_document() {
    let cfg = Config::default();
    let src = assemble(&cfg, "x", "\\usepackage{tikz}\n", true).unwrap();
    let extra = src.find("\\usepackage{tikz}").unwrap();
    assert!(extra >= BASE_PREAMBLE.len());
    assert!(extra < src.find("\\begin{document}").unwrap());
}

#[test]
fn custom_base_preamble_is_kept_verbatim() {
    let mut cfg = Config::default();
    cfg.document.base_preamble = "\\documentclass{minimal}".into();
    let src = assemble(&cfg, "x", "", true).unwrap();
    assert!(src.starts_with("\\documentclass{minimal}\n"));
}

#[test]
fn natbib_bibliography_lines() {
    let cfg = Config::default();
    let mut req = CompileRequest::new("\\citet{a}");
    req.bib_entries = Some("@misc{a, title={A}}".into());
    let doc = assemble_request(&cfg, &req).unwrap();

    assert!(doc.source.contains("\\usepackage{natbib}"));
    assert!(doc.source.contains("\\bibliographystyle{plainnat}\n\\bibliography{references}\n\\end{document}"));
    let fallback = doc.without_bibliography.unwrap();
    assert!(!fallback.contains("natbib"));
    assert!(fallback.contains("\\citet{a}"));
}

#[test]
fn biblatex_bibliography_lines() {
    let mut cfg = Config::default();
    cfg.document.biblatex_style = "authoryear".into();
    let mut req = CompileRequest::new("\\cite{a}");
    req.bib_entries = Some("@misc{a, title={A}}".into());
    req.use_biblatex = true;
    let doc = assemble_request(&cfg, &req).unwrap();

    assert!(doc.source.contains("\\usepackage[style=authoryear]{biblatex}"));
    assert!(doc.source.contains("\\addbibresource{references.bib}"));
    assert!(doc.source.contains("\\printbibliography\n\\end{document}"));
}

#[test]
fn blank_bibliography_is_ignored() {
    let cfg = Config::default();
    let mut req = CompileRequest::new("x");
    req.bib_entries = Some("   \n".into());
    let doc = assemble_request(&cfg, &req).unwrap();
    assert!(doc.bibliography.is_none());
    assert!(doc.without_bibliography.is_none());
}

#[test]
fn body_start_line_points_at_the_body() {
    let cfg = Config::default();
    let doc = assemble_request(&cfg, &CompileRequest::new("first\nsecond")).unwrap();
    let line = doc.source.lines().nth(doc.body_start_line as usize - 1).unwrap();
    assert_eq!(line, "first");
    assert_eq!(doc.body_line_count, 2);
}

#[test]
fn rejects_document_wrappers_in_caller_text() {
    let cfg = Config::default();
    for body in [
        "\\documentclass{article}",
        "\\begin{document}x",
        "x\\end{document}",
        "\\begin {document}",
    ] {
        let err = assemble(&cfg, body, "", true).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation, "{body}");
    }
    let err = assemble(&cfg, "x", "\\begin{document}", true).unwrap_err();
    assert!(err.to_string().contains("preamble"));
}

#[test]
fn rejects_empty_and_oversized_bodies() {
    let mut cfg = Config::default();
    assert!(assemble(&cfg, "", "", true).is_err());
    assert!(assemble(&cfg, " \n\t", "", true).is_err());

    cfg.limits.max_body_bytes = 8;
    let err = assemble(&cfg, "123456789", "", true).unwrap_err();
    assert!(err.to_string().contains("too large"));
}

#[test]
fn graphics_paths_are_screened() {
    let cfg = Config::default();
    for body in [
        "\\includegraphics{/etc/passwd}",
        "\\includegraphics[width=2cm]{../x.png}",
        "\\includegraphics*[trim=1 1 1 1]{~/x}",
        "\\includepdf{C:/x.pdf}",
        "\\includegraphics{\\jobname}",
        "\\graphicspath{{figs/}{/tmp/}}",
        "\\includegraphics{{/etc/passwd}.png}",
        "\\includegraphics%\n{/etc/hosts}",
        "\\includegraphics % comment\n  [width=1cm]{/etc/hosts}",
        "\\let\\ig\\includegraphics \\ig{/etc/hosts}",
        "\\expandafter\\includegraphics\\expandafter{\\x}",
        "\\csname includegraphics\\endcsname{/etc/hosts}",
        "\\graphicspath{{{/etc}/}}",
        "\\includegraphics{figure.png",
    ] {
        let err = assemble(&cfg, body, "", true).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation, "{body}");
    }
    assert!(assemble(&cfg, "\\includegraphics[width=2cm]{example-image}", "", true).is_ok());
    assert!(assemble(&cfg, "\\graphicspath{{figs/}{plots/}}", "", true).is_ok());
    assert!(assemble(&cfg, "\\includegraphics{{plot.v2}.png}", "", true).is_ok());
    assert!(assemble(&cfg, "\\includegraphics{a.png} % 50\\% scale\nnext", "", true).is_ok());
    assert!(assemble(&cfg, "\\includegraphics{/etc/passwd}", "", false).is_ok());
    assert!(assemble(&cfg, "x", "\\graphicspath{{/}}", true).is_err());
}

#[test]
fn caller_text_is_normalized() {
    let cfg = Config::default();
    let src = assemble(&cfg, "a\r\nb\u{0007}c", "", true).unwrap();
    assert!(src.contains("a\nbc\n"));
    assert!(!src.contains('\r'));
}

#[test]
fn aliased_graphics_command_is_rejected_in_the_preamble_too() {
    let cfg = Config::default();
    let err = assemble(&cfg, "\\ig{/etc/hosts}", "\\let\\ig\\includegraphics", true).unwrap_err();
    assert_eq!(err.kind(), FailureKind::Validation);
    assert!(err.to_string().contains("literal path"));
}
