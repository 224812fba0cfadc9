//! End-to-end scenarios: build ASTs the way the parser would, run both
//! passes, and inspect the typed SIR.

use f90sema::ast::{
    Attr, BoundProcedure, Case, Decl, Declaration, DerivedType, Dim, Entity, Expr, Function,
    IndexArg, IntentAttr, Interface, InterfaceHeader, Keyword, Module, Program, ProgramUnit, Stmt,
    StmtKind, TranslationUnit, TypeSpec, Use, UseSymbol,
};
use f90sema::sir::{
    expr_value, Abi, CastKind, Expr as SExpr, Intent, Stmt as SStmt, Storage, Symbol, Type,
};
use f90sema::{ast_to_sir, ErrorKind, IntrinsicModules, SemanticError, Sir, SymbolTable};

fn analyze(unit: TranslationUnit) -> Result<Sir, SemanticError> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut loader = IntrinsicModules::new();
    ast_to_sir(&unit, SymbolTable::new(), &mut loader)
}

fn unit(items: Vec<ProgramUnit>) -> TranslationUnit {
    TranslationUnit { items }
}

fn program(name: &str, uses: Vec<Use>, decls: Vec<Decl>, body: Vec<Stmt>) -> ProgramUnit {
    ProgramUnit::Program(Program {
        name: name.to_string(),
        uses,
        decls,
        body,
        contains: Vec::new(),
        span: 0..0,
    })
}

fn module(name: &str, decls: Vec<Decl>, contains: Vec<ProgramUnit>) -> ProgramUnit {
    ProgramUnit::Module(Module {
        name: name.to_string(),
        uses: Vec::new(),
        decls,
        contains,
        span: 0..0,
    })
}

fn subroutine(name: &str, args: &[&str], decls: Vec<Decl>, body: Vec<Stmt>) -> ProgramUnit {
    ProgramUnit::Subroutine(f90sema::ast::Subroutine {
        name: name.to_string(),
        args: args.iter().map(|a| a.to_string()).collect(),
        decls,
        body,
        contains: Vec::new(),
        span: 0..0,
    })
}

fn decl(spec: TypeSpec, names: &[&str]) -> Decl {
    Decl::Declaration(Declaration::typed(
        spec,
        names.iter().map(|n| Entity::named(n)).collect(),
    ))
}

fn decl_attrs(spec: TypeSpec, attrs: Vec<Attr>, entities: Vec<Entity>) -> Decl {
    Decl::Declaration(Declaration::typed(spec, entities).with_attrs(attrs))
}

fn use_module(name: &str) -> Use {
    Use {
        module: name.to_string(),
        only: Vec::new(),
        span: 0..0,
    }
}

fn stmt(kind: StmtKind) -> Stmt {
    Stmt::new(kind)
}

fn assign(name: &str, value: Expr) -> Stmt {
    stmt(StmtKind::Assignment {
        target: Expr::name(name),
        value,
    })
}

fn call_stmt(name: &str, args: Vec<Expr>) -> Stmt {
    stmt(StmtKind::SubroutineCall {
        name: name.to_string(),
        member: None,
        args: args.into_iter().map(IndexArg::plain).collect(),
    })
}

fn program_body(sir: &Sir) -> &[SStmt] {
    for &item in &sir.items {
        if let Symbol::Program(p) = sir.table.symbol(item) {
            return &p.body;
        }
    }
    panic!("translation unit has no program");
}

fn program_deps(sir: &Sir) -> &[String] {
    for &item in &sir.items {
        if let Symbol::Program(p) = sir.table.symbol(item) {
            return &p.dependencies;
        }
    }
    panic!("translation unit has no program");
}

/// Walks an expression and asserts that every binary-style node has equal
/// operand types after cast insertion.
fn assert_operand_types_equal(sir: &Sir, e: &SExpr) {
    let check = |l: &SExpr, r: &SExpr| {
        assert_eq!(
            sir.table.expr_type(l),
            sir.table.expr_type(r),
            "operand types differ after cast insertion"
        );
    };
    match e {
        SExpr::BinOp { left, right, .. }
        | SExpr::Compare { left, right, .. }
        | SExpr::BoolOp { left, right, .. } => {
            check(left, right);
            assert_operand_types_equal(sir, left);
            assert_operand_types_equal(sir, right);
        }
        SExpr::ImplicitCast { arg, .. } | SExpr::UnaryOp { operand: arg, .. } => {
            assert_operand_types_equal(sir, arg);
        }
        _ => {}
    }
}

fn contains_cast(e: &SExpr) -> bool {
    match e {
        SExpr::ImplicitCast { .. } => true,
        SExpr::BinOp { left, right, .. }
        | SExpr::Compare { left, right, .. }
        | SExpr::BoolOp { left, right, .. }
        | SExpr::StrOp { left, right, .. } => contains_cast(left) || contains_cast(right),
        SExpr::UnaryOp { operand, .. } => contains_cast(operand),
        _ => false,
    }
}

#[test]
fn folds_constant_integer_addition() {
    // program p; integer :: i; i = 2 + 3; end program
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["i"])],
        vec![assign("i", Expr::add(Expr::num(2), Expr::num(3)))],
    )]))
    .unwrap();
    let body = program_body(&sir);
    assert_eq!(body.len(), 1);
    let SStmt::Assignment { value, .. } = &body[0] else {
        panic!("expected assignment, got {:?}", body[0]);
    };
    assert_eq!(expr_value(value), Some(5));
    assert!(!contains_cast(value));
}

#[test]
fn casts_integer_operand_toward_real() {
    // program p; real :: r; r = 2 + 3.0; end program
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::real(), &["r"])],
        vec![assign("r", Expr::add(Expr::num(2), Expr::real("3.0")))],
    )]))
    .unwrap();
    let body = program_body(&sir);
    let SStmt::Assignment { value, .. } = &body[0] else {
        panic!("expected assignment");
    };
    let SExpr::BinOp {
        left, right, ty, ..
    } = value
    else {
        panic!("expected binop, got {:?}", value);
    };
    assert!(matches!(
        left.as_ref(),
        SExpr::ImplicitCast {
            cast: CastKind::IntegerToReal,
            ..
        }
    ));
    assert!(matches!(right.as_ref(), SExpr::ConstantReal { .. }));
    assert_eq!(*ty, Type::real(4));
    assert_eq!(expr_value(value), None);
    assert_operand_types_equal(&sir, value);
}

#[test]
fn assignment_inserts_implicit_cast() {
    // real :: a; integer :: i; a = i
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![
            decl(TypeSpec::real(), &["a"]),
            decl(TypeSpec::integer(), &["i"]),
        ],
        vec![assign("a", Expr::name("i"))],
    )]))
    .unwrap();
    let SStmt::Assignment { value, .. } = &program_body(&sir)[0] else {
        panic!("expected assignment");
    };
    assert!(matches!(
        value,
        SExpr::ImplicitCast {
            cast: CastKind::IntegerToReal,
            ..
        }
    ));
}

#[test]
fn character_from_integer_is_rejected() {
    // character :: c; integer :: i; c = i
    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![
            decl(TypeSpec::character(), &["c"]),
            decl(TypeSpec::integer(), &["i"]),
        ],
        vec![assign("c", Expr::name("i"))],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::IllegalCoercion);
}

fn module_with_subroutine() -> ProgramUnit {
    // module m; contains; subroutine s(x); integer, intent(in) :: x; ...
    module(
        "m",
        vec![],
        vec![subroutine(
            "s",
            &["x"],
            vec![decl_attrs(
                TypeSpec::integer(),
                vec![Attr::Intent(IntentAttr::In)],
                vec![Entity::named("x")],
            )],
            vec![],
        )],
    )
}

#[test]
fn call_through_use_resolves_external() {
    let sir = analyze(unit(vec![
        module_with_subroutine(),
        program(
            "p",
            vec![use_module("m"), use_module("m")],
            vec![],
            vec![call_stmt("s", vec![Expr::num(1)])],
        ),
    ]))
    .unwrap();
    // m appears exactly once in the dependency list.
    assert_eq!(program_deps(&sir), ["m"]);
    let SStmt::SubroutineCall { sym, .. } = &program_body(&sir)[0] else {
        panic!("expected call");
    };
    let Symbol::External(ext) = sir.table.symbol(*sym) else {
        panic!("call must resolve through an external symbol");
    };
    assert!(matches!(sir.table.symbol(ext.target), Symbol::Subroutine(s) if s.name == "s"));
}

#[test]
fn externals_never_chain_through_reexport() {
    // module m has v; module n uses m; the program imports v from n and
    // must land on the original variable, not on n's external.
    let sir = analyze(unit(vec![
        module("m", vec![decl(TypeSpec::integer(), &["v"])], vec![]),
        ProgramUnit::Module(Module {
            name: "n".to_string(),
            uses: vec![use_module("m")],
            decls: vec![],
            contains: vec![],
            span: 0..0,
        }),
        program(
            "p",
            vec![Use {
                module: "n".to_string(),
                only: vec![UseSymbol {
                    remote: "v".to_string(),
                    local: Some("w".to_string()),
                }],
                span: 0..0,
            }],
            vec![],
            vec![assign("w", Expr::num(3))],
        ),
    ]))
    .unwrap();
    let SStmt::Assignment { target, .. } = &program_body(&sir)[0] else {
        panic!("expected assignment");
    };
    let SExpr::Var { sym } = target else {
        panic!("expected variable target");
    };
    let Symbol::External(ext) = sir.table.symbol(*sym) else {
        panic!("expected an external for the imported name");
    };
    assert!(
        matches!(sir.table.symbol(ext.target), Symbol::Variable(v) if v.name == "v"),
        "external must point at the ultimate target"
    );
}

#[test]
fn subroutine_body_gets_implicit_deallocate() {
    // integer, allocatable :: a(:); allocate(a(5)); deallocate(a)
    let sir = analyze(unit(vec![subroutine(
        "work",
        &[],
        vec![decl_attrs(
            TypeSpec::integer(),
            vec![Attr::Allocatable],
            vec![Entity::named("a").with_dims(vec![Dim {
                start: None,
                end: None,
            }])],
        )],
        vec![
            stmt(StmtKind::Allocate {
                args: vec![Expr::call("a", vec![Expr::num(5)])],
                keywords: vec![],
            }),
            stmt(StmtKind::Deallocate {
                args: vec![Expr::name("a")],
            }),
        ],
    )]))
    .unwrap();
    let Symbol::Subroutine(sub) = sir.table.symbol(sir.items[0]) else {
        panic!("expected subroutine item");
    };
    assert_eq!(sub.body.len(), 3);
    let SStmt::Allocate { args, stat } = &sub.body[0] else {
        panic!("expected allocate, got {:?}", sub.body[0]);
    };
    assert!(stat.is_none());
    // Missing lower bound defaults to 1.
    assert_eq!(args[0].dims.len(), 1);
    assert_eq!(
        args[0].dims[0].start.as_ref().and_then(expr_value),
        Some(1)
    );
    assert_eq!(args[0].dims[0].end.as_ref().and_then(expr_value), Some(5));
    assert!(matches!(&sub.body[1], SStmt::ExplicitDeallocate { vars } if vars.len() == 1));
    assert!(matches!(&sub.body[2], SStmt::ImplicitDeallocate { vars } if vars.len() == 1));
}

#[test]
fn deallocate_of_non_allocatable_is_rejected() {
    let err = analyze(unit(vec![subroutine(
        "work",
        &[],
        vec![decl(TypeSpec::integer(), &["b"])],
        vec![stmt(StmtKind::Deallocate {
            args: vec![Expr::name("b")],
        })],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn intent_out_allocatable_actual_is_deallocated_before_call() {
    let sir = analyze(unit(vec![
        module(
            "m",
            vec![],
            vec![subroutine(
                "fill",
                &["buf"],
                vec![decl_attrs(
                    TypeSpec::integer(),
                    vec![Attr::Allocatable, Attr::Intent(IntentAttr::Out)],
                    vec![Entity::named("buf").with_dims(vec![Dim {
                        start: None,
                        end: None,
                    }])],
                )],
                vec![],
            )],
        ),
        program(
            "p",
            vec![use_module("m")],
            vec![decl_attrs(
                TypeSpec::integer(),
                vec![Attr::Allocatable],
                vec![Entity::named("data").with_dims(vec![Dim {
                    start: None,
                    end: None,
                }])],
            )],
            vec![call_stmt("fill", vec![Expr::name("data")])],
        ),
    ]))
    .unwrap();
    let body = program_body(&sir);
    // deallocate-before-call, the call, then the scope epilogue
    assert_eq!(body.len(), 3);
    assert!(matches!(&body[0], SStmt::ImplicitDeallocate { vars } if vars.len() == 1));
    assert!(matches!(&body[1], SStmt::SubroutineCall { .. }));
    assert!(matches!(&body[2], SStmt::ImplicitDeallocate { vars } if vars.len() == 1));
}

#[test]
fn names_resolve_case_insensitively() {
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["foo"])],
        vec![assign("FOO", Expr::num(1)), assign("Foo", Expr::num(2))],
    )]))
    .unwrap();
    let body = program_body(&sir);
    let (SStmt::Assignment { target: a, .. }, SStmt::Assignment { target: b, .. }) =
        (&body[0], &body[1])
    else {
        panic!("expected two assignments");
    };
    assert_eq!(a, b);
}

#[test]
fn redeclaration_outside_root_scope_is_rejected() {
    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![
            decl(TypeSpec::integer(), &["x"]),
            decl(TypeSpec::real(), &["x"]),
        ],
        vec![],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::AlreadyDefined);
}

#[test]
fn integer_literal_bound_is_enforced() {
    let ok = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["i"])],
        vec![assign("i", Expr::num((1 << 62) - 1))],
    )]));
    assert!(ok.is_ok());

    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["i"])],
        vec![assign("i", Expr::num(1 << 62))],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::IntegerLiteralTooLarge);
}

#[test]
fn analysis_is_deterministic() {
    let build = || {
        unit(vec![
            module_with_subroutine(),
            program(
                "p",
                vec![use_module("m")],
                vec![decl(TypeSpec::real(), &["r"])],
                vec![
                    assign("r", Expr::add(Expr::num(2), Expr::real("3.0"))),
                    call_stmt("s", vec![Expr::num(1)]),
                ],
            ),
        ])
    };
    let a = analyze(build()).unwrap();
    let b = analyze(build()).unwrap();
    assert_eq!(format!("{:?}", a), format!("{:?}", b));
}

fn generic_module() -> ProgramUnit {
    let swap_decl = |spec: TypeSpec| {
        decl_attrs(
            spec,
            vec![Attr::Intent(IntentAttr::InOut)],
            vec![Entity::named("x")],
        )
    };
    module(
        "m",
        vec![Decl::Interface(Interface {
            header: InterfaceHeader::Generic {
                name: "swap".to_string(),
                procedures: vec!["swap_i".to_string(), "swap_r".to_string()],
            },
            span: 0..0,
        })],
        vec![
            subroutine("swap_i", &["x"], vec![swap_decl(TypeSpec::integer())], vec![]),
            subroutine("swap_r", &["x"], vec![swap_decl(TypeSpec::real())], vec![]),
        ],
    )
}

#[test]
fn generic_dispatch_selects_by_family_and_caches_external() {
    let sir = analyze(unit(vec![
        generic_module(),
        program(
            "p",
            vec![use_module("m")],
            vec![],
            vec![
                call_stmt("swap", vec![Expr::real("1.0")]),
                call_stmt("swap", vec![Expr::real("2.0")]),
            ],
        ),
    ]))
    .unwrap();
    let body = program_body(&sir);
    let (SStmt::SubroutineCall { sym: a, original, .. }, SStmt::SubroutineCall { sym: b, .. }) =
        (&body[0], &body[1])
    else {
        panic!("expected two calls");
    };
    assert!(original.is_some());
    let Symbol::External(ext) = sir.table.symbol(*a) else {
        panic!("generic dispatch through use must materialize an external");
    };
    assert_eq!(ext.name, "swap@swap_r");
    assert!(matches!(sir.table.symbol(ext.target), Symbol::Subroutine(s) if s.name == "swap_r"));
    // The second call reuses the cached external.
    assert_eq!(a, b);
}

#[test]
fn generic_dispatch_without_match_fails() {
    let err = analyze(unit(vec![
        generic_module(),
        program(
            "p",
            vec![use_module("m")],
            vec![],
            vec![call_stmt("swap", vec![Expr::logical(true)])],
        ),
    ]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoGenericMatch);
}

fn point_type() -> Decl {
    Decl::DerivedType(DerivedType {
        name: "point".to_string(),
        decls: vec![Declaration::typed(
            TypeSpec::integer(),
            vec![Entity::named("x"), Entity::named("y")],
        )],
        bound: vec![],
        span: 0..0,
    })
}

#[test]
fn member_assignment_lowers_to_derived_ref() {
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![point_type(), decl(TypeSpec::derived("point"), &["pt"])],
        vec![stmt(StmtKind::Assignment {
            target: Expr::path(&["pt", "x"]),
            value: Expr::num(1),
        })],
    )]))
    .unwrap();
    let SStmt::Assignment { target, .. } = &program_body(&sir)[0] else {
        panic!("expected assignment");
    };
    let SExpr::DerivedRef { base, member, ty } = target else {
        panic!("expected derived ref, got {:?}", target);
    };
    assert!(matches!(base.as_ref(), SExpr::Var { .. }));
    assert_eq!(*ty, Type::integer(4));
    // The member must live in the derived type's own scope.
    let Symbol::Variable(mv) = sir.table.symbol(*member) else {
        panic!("member must be a variable");
    };
    assert_eq!(mv.name, "x");
}

#[test]
fn unknown_member_is_rejected() {
    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![point_type(), decl(TypeSpec::derived("point"), &["pt"])],
        vec![stmt(StmtKind::Assignment {
            target: Expr::path(&["pt", "z"]),
            value: Expr::num(1),
        })],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NoSuchMember);
}

#[test]
fn type_bound_call_dispatches_through_binding() {
    let sir = analyze(unit(vec![
        module(
            "shapes",
            vec![Decl::DerivedType(DerivedType {
                name: "counter".to_string(),
                decls: vec![Declaration::typed(
                    TypeSpec::integer(),
                    vec![Entity::named("n")],
                )],
                bound: vec![BoundProcedure {
                    name: "bump".to_string(),
                    proc: "bump_impl".to_string(),
                }],
                span: 0..0,
            })],
            vec![subroutine(
                "bump_impl",
                &["c"],
                vec![decl(TypeSpec::derived("counter"), &["c"])],
                vec![],
            )],
        ),
        program(
            "p",
            vec![use_module("shapes")],
            vec![decl(TypeSpec::derived("counter"), &["c"])],
            vec![stmt(StmtKind::SubroutineCall {
                name: "bump".to_string(),
                member: Some("c".to_string()),
                args: vec![IndexArg::plain(Expr::name("c"))],
            })],
        ),
    ]))
    .unwrap();
    let SStmt::SubroutineCall { sym, original, .. } = &program_body(&sir)[0] else {
        panic!("expected call");
    };
    assert!(matches!(
        sir.table.symbol(sir.table.get_past_external(*sym)),
        Symbol::Subroutine(s) if s.name == "bump_impl"
    ));
    let bound = original.expect("bound dispatch keeps the original symbol");
    assert!(matches!(
        sir.table.symbol(bound),
        Symbol::ClassProcedure(cp) if cp.name == "bump"
    ));
}

#[test]
fn math_intrinsics_are_synthesized_on_first_use() {
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::real(), &["r", "x"])],
        vec![assign("r", Expr::call("sin", vec![Expr::name("x")]))],
    )]))
    .unwrap();
    let SStmt::Assignment { value, .. } = &program_body(&sir)[0] else {
        panic!("expected assignment");
    };
    let SExpr::FunctionCall { sym, ty, .. } = value else {
        panic!("expected function call, got {:?}", value);
    };
    assert_eq!(*ty, Type::real(4));
    let Symbol::Function(f) = sir.table.symbol(*sym) else {
        panic!("expected function symbol");
    };
    assert_eq!(f.abi, Abi::Intrinsic);
    // Synthesized into the global scope, visible to later units.
    assert!(sir
        .table
        .lookup_local(sir.global_scope, "sin")
        .is_some());
}

#[test]
fn intrinsic_table_loads_owning_module() {
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![
            decl_attrs(
                TypeSpec::real(),
                vec![Attr::Dimension(vec![Dim {
                    start: None,
                    end: Some(Expr::num(10)),
                }])],
                vec![Entity::named("a")],
            ),
            decl(TypeSpec::integer(), &["n"]),
        ],
        vec![assign("n", Expr::call("size", vec![Expr::name("a")]))],
    )]))
    .unwrap();
    let SStmt::Assignment { value, .. } = &program_body(&sir)[0] else {
        panic!("expected assignment");
    };
    let SExpr::FunctionCall { sym, ty, .. } = value else {
        panic!("expected function call");
    };
    assert_eq!(*ty, Type::integer(4));
    let Symbol::External(ext) = sir.table.symbol(*sym) else {
        panic!("intrinsic resolves through an external symbol");
    };
    assert_eq!(ext.module_name, "f90_intrinsic_array");
    // The intrinsic module is materialized under the global scope.
    assert!(sir
        .table
        .lookup_local(sir.global_scope, "f90_intrinsic_array")
        .is_some());
}

#[test]
fn function_return_variable_carries_return_intent() {
    let sir = analyze(unit(vec![ProgramUnit::Function(Function {
        name: "sq".to_string(),
        args: vec!["x".to_string()],
        prefix: Some(TypeSpec::integer()),
        result: None,
        decls: vec![decl_attrs(
            TypeSpec::integer(),
            vec![Attr::Intent(IntentAttr::In)],
            vec![Entity::named("x")],
        )],
        body: vec![assign("sq", Expr::mul(Expr::name("x"), Expr::name("x")))],
        contains: vec![],
        span: 0..0,
    })]))
    .unwrap();
    let Symbol::Function(f) = sir.table.symbol(sir.items[0]) else {
        panic!("expected function item");
    };
    let Symbol::Variable(ret) = sir.table.symbol(f.return_var) else {
        panic!("return var must be a variable");
    };
    assert_eq!(ret.intent, Intent::ReturnVar);
    assert_eq!(ret.scope, f.scope);
    assert_eq!(sir.table.lookup_local(f.scope, "sq"), Some(f.return_var));
}

#[test]
fn return_type_specified_twice_is_rejected() {
    let err = analyze(unit(vec![ProgramUnit::Function(Function {
        name: "f".to_string(),
        args: vec![],
        prefix: Some(TypeSpec::integer()),
        result: None,
        decls: vec![decl(TypeSpec::integer(), &["f"])],
        body: vec![],
        contains: vec![],
        span: 0..0,
    })]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateReturnType);
}

#[test]
fn select_case_requires_integer_tests() {
    let good = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["i", "j"])],
        vec![stmt(StmtKind::Select {
            test: Expr::name("i"),
            cases: vec![
                Case::Values {
                    tests: vec![Expr::num(1), Expr::num(2)],
                    body: vec![assign("j", Expr::num(1))],
                    span: 0..0,
                },
                Case::Range {
                    start: Some(Expr::num(3)),
                    end: Some(Expr::num(9)),
                    body: vec![],
                    span: 0..0,
                },
                Case::Default {
                    body: vec![assign("j", Expr::num(0))],
                    span: 0..0,
                },
            ],
        })],
    )]));
    assert!(good.is_ok());

    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["i"])],
        vec![stmt(StmtKind::Select {
            test: Expr::name("i"),
            cases: vec![Case::Values {
                tests: vec![Expr::str("one")],
                body: vec![],
                span: 0..0,
            }],
        })],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn duplicate_default_case_is_rejected() {
    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["i"])],
        vec![stmt(StmtKind::Select {
            test: Expr::name("i"),
            cases: vec![
                Case::Default {
                    body: vec![],
                    span: 0..0,
                },
                Case::Default {
                    body: vec![],
                    span: 0..0,
                },
            ],
        })],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DuplicateArgument);
}

#[test]
fn do_loop_requires_loop_variable() {
    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![],
        vec![stmt(StmtKind::DoLoop {
            var: None,
            start: Some(Expr::num(1)),
            end: Some(Expr::num(10)),
            increment: None,
            body: vec![],
        })],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingRequiredArgument);
}

#[test]
fn pointer_association_checks_base_types() {
    let ok = analyze(unit(vec![program(
        "p",
        vec![],
        vec![
            decl_attrs(
                TypeSpec::real(),
                vec![Attr::Pointer],
                vec![Entity::named("ptr")],
            ),
            decl(TypeSpec::real(), &["x"]),
        ],
        vec![stmt(StmtKind::Associate {
            target: Expr::name("ptr"),
            value: Expr::name("x"),
        })],
    )]));
    assert!(ok.is_ok());

    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![
            decl_attrs(
                TypeSpec::real(),
                vec![Attr::Pointer],
                vec![Entity::named("ptr")],
            ),
            decl(TypeSpec::integer(), &["i"]),
        ],
        vec![stmt(StmtKind::Associate {
            target: Expr::name("ptr"),
            value: Expr::name("i"),
        })],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn open_checks_keyword_arguments() {
    let ok = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["u"])],
        vec![stmt(StmtKind::Open {
            args: vec![],
            keywords: vec![
                Keyword {
                    name: "unit".to_string(),
                    value: Expr::name("u"),
                },
                Keyword {
                    name: "file".to_string(),
                    value: Expr::str("data.txt"),
                },
            ],
        })],
    )]));
    assert!(ok.is_ok());

    // unit given positionally and by keyword
    let dup = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["u"])],
        vec![stmt(StmtKind::Open {
            args: vec![Expr::name("u")],
            keywords: vec![Keyword {
                name: "unit".to_string(),
                value: Expr::name("u"),
            }],
        })],
    )]))
    .unwrap_err();
    assert_eq!(dup.kind, ErrorKind::DuplicateArgument);

    let missing = analyze(unit(vec![program(
        "p",
        vec![],
        vec![],
        vec![stmt(StmtKind::Open {
            args: vec![],
            keywords: vec![Keyword {
                name: "file".to_string(),
                value: Expr::str("data.txt"),
            }],
        })],
    )]))
    .unwrap_err();
    assert_eq!(missing.kind, ErrorKind::MissingRequiredArgument);

    let unknown = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["u"])],
        vec![stmt(StmtKind::Open {
            args: vec![Expr::name("u")],
            keywords: vec![Keyword {
                name: "access".to_string(),
                value: Expr::str("stream"),
            }],
        })],
    )]))
    .unwrap_err();
    assert_eq!(unknown.kind, ErrorKind::InvalidKeywordArgument);
}

#[test]
fn write_requires_unit_and_format() {
    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["u"])],
        vec![stmt(StmtKind::Write {
            args: vec![Some(Expr::name("u"))],
            keywords: vec![],
            values: vec![Expr::num(1)],
        })],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MissingRequiredArgument);

    let ok = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["u"])],
        vec![stmt(StmtKind::Write {
            args: vec![Some(Expr::name("u")), None],
            keywords: vec![],
            values: vec![Expr::num(1)],
        })],
    )]));
    assert!(ok.is_ok());
}

#[test]
fn declared_kind_controls_cast_insertion() {
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer().with_kind(Expr::num(8)), &["big"])],
        vec![assign("big", Expr::num(1))],
    )]))
    .unwrap();
    let SStmt::Assignment { value, .. } = &program_body(&sir)[0] else {
        panic!("expected assignment");
    };
    assert!(matches!(
        value,
        SExpr::ImplicitCast {
            cast: CastKind::IntegerToInteger,
            ty: Type::Integer { kind: 8, .. },
            ..
        }
    ));
}

#[test]
fn parameter_constants_feed_kind_specifiers() {
    // integer, parameter :: dp = 8; real(dp) :: x
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![
            decl_attrs(
                TypeSpec::integer(),
                vec![Attr::Parameter],
                vec![Entity::named("dp").with_init(Expr::num(8))],
            ),
            decl(TypeSpec::real().with_kind(Expr::name("dp")), &["x"]),
        ],
        vec![],
    )]))
    .unwrap();
    let Symbol::Program(p) = sir.table.symbol(sir.items[0]) else {
        panic!("expected program");
    };
    let x = sir.table.lookup_local(p.scope, "x").unwrap();
    let Symbol::Variable(v) = sir.table.symbol(x) else {
        panic!("expected variable");
    };
    assert!(matches!(v.ty, Type::Real { kind: 8, .. }));
    assert_eq!(v.storage, Storage::Default);
    let dp = sir.table.lookup_local(p.scope, "dp").unwrap();
    let Symbol::Variable(dpv) = sir.table.symbol(dp) else {
        panic!("expected variable");
    };
    assert_eq!(dpv.storage, Storage::Parameter);
    assert_eq!(dpv.value, Some(8));
}

#[test]
fn folding_skips_undefined_operations() {
    let sir = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["i", "j"])],
        vec![
            assign("i", Expr::div(Expr::num(1), Expr::num(0))),
            assign("j", Expr::pow(Expr::num(2), Expr::neg(Expr::num(1)))),
        ],
    )]))
    .unwrap();
    for st in program_body(&sir) {
        let SStmt::Assignment { value, .. } = st else {
            panic!("expected assignment");
        };
        assert_eq!(expr_value(value), None);
    }
}

#[test]
fn array_initializer_requires_one_base_type() {
    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl_attrs(
            TypeSpec::integer(),
            vec![Attr::Dimension(vec![Dim {
                start: None,
                end: Some(Expr::num(2)),
            }])],
            vec![Entity::named("a")],
        )],
        vec![stmt(StmtKind::Assignment {
            target: Expr::name("a"),
            value: Expr {
                kind: f90sema::ast::ExprKind::ArrayInitializer(vec![
                    Expr::num(1),
                    Expr::str("two"),
                ]),
                span: 0..0,
            },
        })],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn constant_array_needs_array_target() {
    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![decl(TypeSpec::integer(), &["i"])],
        vec![stmt(StmtKind::Assignment {
            target: Expr::name("i"),
            value: Expr {
                kind: f90sema::ast::ExprKind::ArrayInitializer(vec![Expr::num(1), Expr::num(2)]),
                span: 0..0,
            },
        })],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn undeclared_name_is_reported() {
    let err = analyze(unit(vec![program(
        "p",
        vec![],
        vec![],
        vec![assign("ghost", Expr::num(1))],
    )]))
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SymbolNotFound);
}
