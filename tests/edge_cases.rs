use fspolicy::{
    compile_bool_expr, parse_bool_expr, AttrSet, CompileContext, CompileError, CriteriaCatalog,
    EngineConfig, EntryId, EvalContext, Expression, ObjectType, PolicyEngine, SmValue,
    StaticStatusManager, StatusManager, TimeModifier, ValueType, Verdict, XattrError, XattrReader,
};

const NOW: i64 = 1_700_000_000;
const DAY: i64 = 86_400;

fn compile_with(text: &str, sm: Option<&dyn StatusManager>) -> Result<Expression, CompileError> {
    let catalog = CriteriaCatalog::new();
    let config = EngineConfig::new("/fs");
    let parsed = parse_bool_expr(text).unwrap();
    compile_bool_expr(parsed, &CompileContext::new(&catalog, &config).with_status(sm))
}

fn compile(text: &str) -> Expression {
    compile_with(text, None).unwrap()
}

fn id() -> EntryId {
    EntryId::new("0x200000401:0x2:0x0")
}

fn eval(e: &Expression, attrs: &AttrSet) -> Verdict {
    e.evaluate(&id(), attrs, &EvalContext::at(NOW))
}

#[test]
fn missing_attribute_does_not_hide_a_decision() {
    let and = compile("size > 1KB and owner == root");
    let or = compile("size > 1KB or owner == root");
    let only_size = AttrSet::new().with_size(10);
    assert_eq!(eval(&and, &only_size), Verdict::NoMatch);
    assert_eq!(eval(&or, &only_size), Verdict::MissingAttribute);
    let big = AttrSet::new().with_size(1 << 20);
    assert_eq!(eval(&and, &big), Verdict::MissingAttribute);
    assert_eq!(eval(&or, &big), Verdict::Match);
}

#[test]
fn missing_left_operand_is_not_overridden() {
    let huge = AttrSet::new().with_size(2 << 30);
    let or = compile("last_access > 1d or size > 1GB");
    let and = compile("last_access > 1d and size < 1GB");
    assert_eq!(eval(&or, &huge), Verdict::MissingAttribute);
    assert_eq!(eval(&and, &huge), Verdict::MissingAttribute);

    let reader = Xattrs;
    let ctx = EvalContext::at(NOW).with_xattr_reader(&reader);
    let nfs = huge.clone().with_fullpath("/fs/nfs");
    let failing = compile("xattr.user.tier == hot and owner == root");
    assert_eq!(failing.evaluate(&id(), &nfs, &ctx), Verdict::Error);
    let missing_first = compile("owner == root and xattr.user.tier == hot");
    assert_eq!(missing_first.evaluate(&id(), &nfs, &ctx), Verdict::MissingAttribute);
}

#[test]
fn negation_keeps_missing() {
    let e = compile("not owner == root");
    assert_eq!(eval(&e, &AttrSet::new()), Verdict::MissingAttribute);
    assert_eq!(eval(&e, &AttrSet::new().with_owner("bob")), Verdict::Match);
}

#[test]
fn zero_duration_tests_presence() {
    let never = compile("last_access == 0");
    let ever = compile("last_access != 0");
    let unset = AttrSet::new().with_last_access(0);
    let set = AttrSet::new().with_last_access(NOW - DAY);
    assert_eq!(eval(&never, &unset), Verdict::Match);
    assert_eq!(eval(&never, &set), Verdict::NoMatch);
    assert_eq!(eval(&ever, &set), Verdict::Match);

    let older = compile("last_access > 1h");
    assert_eq!(eval(&older, &unset), Verdict::NoMatch);
}

#[test]
fn time_modifier_shrinks_thresholds() {
    let e = compile("last_mod > 10d");
    let attrs = AttrSet::new().with_last_mod(NOW - 6 * DAY);
    assert_eq!(eval(&e, &attrs), Verdict::NoMatch);
    let ctx = EvalContext::at(NOW).with_time_modifier(Some(TimeModifier::new(0.5, DAY)));
    assert_eq!(e.evaluate(&id(), &attrs, &ctx), Verdict::Match);
}

#[test]
fn type_restricted_criteria() {
    let ost = compile("ost_index == 3");
    let dir = AttrSet::new()
        .with_type(ObjectType::Directory)
        .with_ost_indices(vec![3]);
    assert_eq!(eval(&ost, &dir), Verdict::NoMatch);
    let file = AttrSet::new()
        .with_type(ObjectType::File)
        .with_ost_indices(vec![1, 3]);
    assert_eq!(eval(&ost, &file), Verdict::Match);
    assert_eq!(eval(&compile("ost_index != 3"), &file), Verdict::NoMatch);
    assert_eq!(eval(&compile("ost_index != 4"), &file), Verdict::Match);

    let dircount = compile("dircount > 10");
    let file = AttrSet::new().with_type(ObjectType::File).with_dircount(100);
    assert_eq!(eval(&dircount, &file), Verdict::NoMatch);
}

#[test]
fn iname_and_fileclass_ignore_case() {
    let e = compile("iname == \"*.JPG\"");
    assert_eq!(eval(&e, &AttrSet::new().with_name("holiday.jpg")), Verdict::Match);

    let fc = compile("fileclass == Media");
    let attrs = AttrSet::new().with_fileclass("docs, media");
    assert_eq!(eval(&fc, &attrs), Verdict::Match);
    assert_eq!(eval(&compile("fileclass != media"), &attrs), Verdict::NoMatch);
}

#[test]
fn path_patterns_stay_within_a_component() {
    let one = compile("path == \"/fs/*/a.dat\"");
    let any = compile("path == \"/fs/**/a.dat\"");
    let deep = AttrSet::new().with_fullpath("/fs/x/y/a.dat");
    assert_eq!(eval(&one, &deep), Verdict::NoMatch);
    assert_eq!(eval(&any, &deep), Verdict::Match);
    assert_eq!(
        eval(&one, &AttrSet::new().with_fullpath("/fs/x/a.dat")),
        Verdict::Match
    );
}

#[test]
fn tree_matches_subtree_and_root() {
    let e = compile("tree == \"/fs/projects\"");
    assert_eq!(
        eval(&e, &AttrSet::new().with_fullpath("/fs/projects/a/b/c")),
        Verdict::Match
    );
    assert_eq!(eval(&e, &AttrSet::new().with_fullpath("/fs/projects")), Verdict::Match);
    assert_eq!(
        eval(&e, &AttrSet::new().with_fullpath("/fs/projects2/x")),
        Verdict::NoMatch
    );
}

#[test]
fn invalid_literals_are_rejected() {
    for text in [
        "size > lots",
        "depth > -1",
        "type == socketz",
        "name == \"a/b\"",
        "last_access > 3fortnights",
        "path == \"/a/***\"",
    ] {
        let err = compile_with(text, None).unwrap_err();
        assert!(
            matches!(err, CompileError::InvalidValue { .. }),
            "{text}: unexpected {err}"
        );
    }
}

#[test]
fn ordering_on_strings_is_illegal() {
    let err = compile_with("owner > bob", None).unwrap_err();
    assert_eq!(
        err.to_string(),
        "line 1: illegal comparator '>' for criteria 'owner': == or != expected"
    );
}

struct Xattrs;

impl XattrReader for Xattrs {
    fn get_xattr(&self, path: &str, name: &str) -> Result<String, XattrError> {
        match (path, name) {
            ("/fs/a", "user.tier") => Ok("hot".into()),
            ("/fs/a", _) => Err(XattrError::NoAttribute),
            ("/fs/nfs", _) => Err(XattrError::NotSupported),
            _ => Err(XattrError::Other("EIO".into())),
        }
    }
}

#[test]
fn extended_attributes() {
    let e = compile("xattr.user.tier == hot");
    let empty = compile("xattr.user.other == \"\"");
    let reader = Xattrs;
    let ctx = EvalContext::at(NOW).with_xattr_reader(&reader);
    let a = AttrSet::new().with_fullpath("/fs/a");

    assert_eq!(e.evaluate(&id(), &a, &ctx), Verdict::Match);
    assert_eq!(empty.evaluate(&id(), &a, &ctx), Verdict::Match);
    let nfs = AttrSet::new().with_fullpath("/fs/nfs");
    assert_eq!(e.evaluate(&id(), &nfs, &ctx), Verdict::Error);
    assert_eq!(eval(&e, &a), Verdict::MissingAttribute);
}

#[test]
fn status_manager_criteria() {
    let sm = StaticStatusManager::new("lhsm")
        .status("archived")
        .attribute("archive_id", ValueType::Integer)
        .tracks_deleted(true);
    let by_id = compile_with("archive_id > 2", Some(&sm)).unwrap();
    let removed = compile_with("rm_time > 1d", Some(&sm)).unwrap();
    let attrs = AttrSet::new()
        .with_sm_info("archive_id", SmValue::Int(5))
        .with_rm_time(NOW - 2 * DAY);

    let ctx = EvalContext::at(NOW).with_status(Some(&sm));
    assert_eq!(by_id.evaluate(&id(), &attrs, &ctx), Verdict::Match);
    assert_eq!(removed.evaluate(&id(), &attrs, &ctx), Verdict::Match);
    assert_eq!(removed.evaluate(&id(), &attrs, &EvalContext::at(NOW)), Verdict::Error);

    let err = compile_with("status == lost", Some(&sm)).unwrap_err();
    assert!(matches!(err, CompileError::InvalidValue { .. }));
}

#[test]
fn no_classes_means_empty_membership() {
    let engine = PolicyEngine::from_text("").unwrap();
    let membership =
        engine
            .policies()
            .match_classes(&id(), &AttrSet::new(), &EvalContext::at(NOW));
    assert!(membership.is_decided());
    assert_eq!(membership.to_attribute().as_deref(), Some(""));
}

#[test]
fn undecidable_classes_leave_membership_unset() {
    let engine = PolicyEngine::from_text("FileClass a { definition { size > 1 } }").unwrap();
    let mut attrs = AttrSet::new().with_fileclass("stale");
    let membership = engine
        .policies()
        .match_classes(&id(), &attrs, &EvalContext::at(NOW));
    assert!(!membership.is_decided());
    membership.apply_to(&mut attrs);
    assert_eq!(attrs.fileclass(), None);
}

#[test]
fn one_decided_class_sets_membership() {
    let engine = PolicyEngine::from_text(
        "FileClass a { definition { type == file } }\n\
         FileClass b { definition { size > 1 } }",
    )
    .unwrap();
    let mut attrs = AttrSet::new()
        .with_type(ObjectType::File)
        .with_fileclass("stale");
    let membership = engine
        .policies()
        .match_classes(&id(), &attrs, &EvalContext::at(NOW));
    assert!(membership.is_decided());
    membership.apply_to(&mut attrs);
    assert_eq!(attrs.fileclass(), Some("a"));
}

#[test]
fn constants_render_back_to_policy_text() {
    let e = compile("not FALSE and (true or FALSE)");
    assert_eq!(e.to_string(), "((NOT FALSE) AND (TRUE OR FALSE))");
    let e = compile("not FALSE and (size > 1KB or TRUE)");
    let reparsed = compile(&e.to_string());
    assert!(e.diff_structural(&reparsed).is_equal());
    assert_eq!(eval(&reparsed, &AttrSet::new()), Verdict::MissingAttribute);
    assert_eq!(eval(&compile("TRUE"), &AttrSet::new()), Verdict::Match);
}

#[test]
fn rule_without_condition_matches_everything() {
    let engine = PolicyEngine::from_text(
        "FileClass a { definition { type == file } }\n\
         define_policy p { }\n\
         p_rules { rule r { target_fileclass = a; } }",
    )
    .unwrap();
    let policy = engine.policy("p").unwrap();
    let rule = &policy.policy().rules()[0];
    assert_eq!(engine.policies().to_display_string(rule.condition()), "TRUE");
    assert_eq!(
        policy.evaluate_rule(rule, &id(), &AttrSet::new(), &EvalContext::at(NOW)),
        Verdict::Match
    );
}
