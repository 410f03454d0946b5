//! Ahead-of-time rewrites applied to optimized builds.
//!
//! Every mode folds constants and drops algebraic identities. Aggressive
//! modes also inline single-use `let` bindings and remove dead ones.

use std::collections::HashMap;

use super::parser::{BinOp, Expr, Func, Let, Program};
use crate::toolchain::OptimizeMode;

pub fn optimize(mut program: Program, mode: OptimizeMode) -> Program {
    for stmt in &mut program.forward.body {
        stmt.expr = fold(std::mem::replace(&mut stmt.expr, Expr::Num(0.0)));
    }
    program.forward.ret = fold(std::mem::replace(&mut program.forward.ret, Expr::Num(0.0)));

    if mode.is_aggressive() {
        inline_lets(&mut program);
    }
    program
}

fn is_num(expr: &Expr, value: f32) -> bool {
    matches!(expr, Expr::Num(v) if *v == value)
}

/// Constant folding plus identity elimination, bottom-up.
pub fn fold(expr: Expr) -> Expr {
    match expr {
        Expr::Binary { op, lhs, rhs } => {
            let lhs = fold(*lhs);
            let rhs = fold(*rhs);
            if let (Expr::Num(a), Expr::Num(b)) = (&lhs, &rhs) {
                let folded = op.apply(*a, *b);
                if folded.is_finite() {
                    return Expr::Num(folded);
                }
            }
            match op {
                BinOp::Add if is_num(&rhs, 0.0) => lhs,
                BinOp::Add if is_num(&lhs, 0.0) => rhs,
                BinOp::Sub if is_num(&rhs, 0.0) => lhs,
                BinOp::Mul if is_num(&rhs, 1.0) => lhs,
                BinOp::Mul if is_num(&lhs, 1.0) => rhs,
                BinOp::Div if is_num(&rhs, 1.0) => lhs,
                _ => Expr::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            }
        }
        Expr::Call { func, args } => {
            let mut args: Vec<Expr> = args.into_iter().map(fold).collect();
            if func == Func::Neg {
                if let Some(Expr::Call {
                    func: Func::Neg,
                    args: inner,
                }) = args.first_mut()
                {
                    if let Some(arg) = inner.pop() {
                        return arg;
                    }
                }
            }
            if let [Expr::Num(v)] = args.as_slice() {
                let v = *v;
                let folded = if func.is_reduction() {
                    Some(v)
                } else {
                    func.elementwise().map(|f| f(v))
                };
                if let Some(folded) = folded.filter(|x| x.is_finite()) {
                    return Expr::Num(folded);
                }
            }
            Expr::Call { func, args }
        }
        other => other,
    }
}

fn count_uses(program: &Program) -> HashMap<String, usize> {
    let mut uses = HashMap::new();
    let mut bump = |name: &str| *uses.entry(name.to_string()).or_insert(0) += 1;
    for stmt in &program.forward.body {
        stmt.expr.for_each_var(&mut bump);
    }
    program.forward.ret.for_each_var(&mut bump);
    uses
}

fn substitute(expr: Expr, name: &str, value: &Expr) -> Expr {
    match expr {
        Expr::Var(v) if v == name => value.clone(),
        Expr::Binary { op, lhs, rhs } => Expr::Binary {
            op,
            lhs: Box::new(substitute(*lhs, name, value)),
            rhs: Box::new(substitute(*rhs, name, value)),
        },
        Expr::Call { func, args } => Expr::Call {
            func,
            args: args
                .into_iter()
                .map(|a| substitute(a, name, value))
                .collect(),
        },
        other => other,
    }
}

/// Inline lets used exactly once and drop lets never used.
fn inline_lets(program: &mut Program) {
    loop {
        let uses = count_uses(program);
        let body = &program.forward.body;
        let Some(idx) = body
            .iter()
            .position(|stmt| uses.get(&stmt.name).copied().unwrap_or(0) <= 1)
        else {
            return;
        };

        let Let { name, expr } = program.forward.body.remove(idx);
        if uses.get(&name).copied().unwrap_or(0) == 0 {
            continue;
        }
        for stmt in program.forward.body.iter_mut().skip(idx) {
            stmt.expr = substitute(std::mem::replace(&mut stmt.expr, Expr::Num(0.0)), &name, &expr);
        }
        program.forward.ret = fold(substitute(
            std::mem::replace(&mut program.forward.ret, Expr::Num(0.0)),
            &name,
            &expr,
        ));
    }
}
