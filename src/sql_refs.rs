// SPDX-License-Identifier: Apache-2.0

//! SQL reference extraction.
//!
//! Parses agent-proposed SQL, finds every table it reads from (FROM/JOIN,
//! CTE bodies, derived tables and subqueries anywhere in an expression) and
//! tells whether the statement only reads.

use std::collections::HashSet;

use sqlparser::ast::{
    Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, JoinConstraint,
    JoinOperator, ObjectNamePart, Query, Select, SelectItem, SetExpr, Statement, TableFactor,
    TableWithJoins,
};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;

/// A table referenced by a query, as written (`ns.table`, `ns.schema.table`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub parts: Vec<String>,
}

impl TableRef {
    pub fn dotted(&self) -> String {
        self.parts.join(".")
    }

    pub fn is_qualified(&self) -> bool {
        self.parts.len() >= 2
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlAnalysis {
    pub read_only: bool,
    pub tables: Vec<TableRef>,
}

/// Analyzes `sql`; `None` when the parser does not understand it, in which
/// case the engine is left to judge the statement.
pub fn analyze(sql: &str) -> Option<SqlAnalysis> {
    let statements = Parser::parse_sql(&DuckDbDialect {}, sql.trim()).ok()?;
    if statements.is_empty() {
        return None;
    }

    let read_only = statements.iter().all(is_read_only);
    let mut seen = HashSet::new();
    let mut tables = Vec::new();
    for statement in &statements {
        for table in extract_table_refs(statement) {
            if seen.insert(table.dotted().to_lowercase()) {
                tables.push(table);
            }
        }
    }
    Some(SqlAnalysis { read_only, tables })
}

fn is_read_only(statement: &Statement) -> bool {
    match statement {
        Statement::Query(_) | Statement::ExplainTable { .. } => true,
        Statement::Explain { statement, .. } => is_read_only(statement),
        Statement::ShowTables { .. } | Statement::ShowColumns { .. } => true,
        _ => false,
    }
}

fn part_value(part: &ObjectNamePart) -> String {
    match part {
        ObjectNamePart::Identifier(ident) => ident.value.clone(),
        _ => String::new(),
    }
}

fn extract_table_refs(statement: &Statement) -> Vec<TableRef> {
    let mut collector = RefCollector::default();
    match statement {
        Statement::Query(query) => collector.query(query),
        Statement::Explain { statement, .. } => return extract_table_refs(statement),
        _ => {}
    }
    collector.finish()
}

#[derive(Default)]
struct RefCollector {
    refs: Vec<TableRef>,
    cte_names: HashSet<String>,
}

impl RefCollector {
    /// Bare references to a CTE are not tables.
    fn finish(self) -> Vec<TableRef> {
        let ctes = self.cte_names;
        self.refs
            .into_iter()
            .filter(|r| !(r.parts.len() == 1 && ctes.contains(&r.parts[0].to_lowercase())))
            .collect()
    }

    fn query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
                self.query(&cte.query);
            }
        }
        self.set_expr(&query.body);
    }

    fn set_expr(&mut self, set_expr: &SetExpr) {
        match set_expr {
            SetExpr::Select(select) => self.select(select),
            SetExpr::Query(query) => self.query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.set_expr(left);
                self.set_expr(right);
            }
            _ => {}
        }
    }

    fn select(&mut self, select: &Select) {
        for twj in &select.from {
            self.table_with_joins(twj);
        }
        for item in &select.projection {
            if let SelectItem::UnnamedExpr(expr) | SelectItem::ExprWithAlias { expr, .. } = item {
                self.expr(expr);
            }
        }
        if let Some(selection) = &select.selection {
            self.expr(selection);
        }
        if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
            for expr in exprs {
                self.expr(expr);
            }
        }
        if let Some(having) = &select.having {
            self.expr(having);
        }
    }

    fn table_with_joins(&mut self, twj: &TableWithJoins) {
        self.table_factor(&twj.relation);
        for join in &twj.joins {
            self.table_factor(&join.relation);
            match &join.join_operator {
                JoinOperator::Join(JoinConstraint::On(on))
                | JoinOperator::Inner(JoinConstraint::On(on))
                | JoinOperator::Left(JoinConstraint::On(on))
                | JoinOperator::LeftOuter(JoinConstraint::On(on))
                | JoinOperator::Right(JoinConstraint::On(on))
                | JoinOperator::RightOuter(JoinConstraint::On(on))
                | JoinOperator::FullOuter(JoinConstraint::On(on)) => self.expr(on),
                _ => {}
            }
        }
    }

    fn table_factor(&mut self, factor: &TableFactor) {
        match factor {
            // `args` marks a table function such as read_csv(...)
            TableFactor::Table { name, args: None, .. } => {
                let parts: Vec<String> = name.0.iter().map(part_value).collect();
                if parts.iter().all(|p| !p.is_empty()) {
                    self.refs.push(TableRef { parts });
                }
            }
            TableFactor::Derived { subquery, .. } => self.query(subquery),
            TableFactor::NestedJoin { table_with_joins, .. } => {
                self.table_with_joins(table_with_joins)
            }
            _ => {}
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Subquery(query) => self.query(query),
            Expr::Exists { subquery, .. } => self.query(subquery),
            Expr::InSubquery { expr, subquery, .. } => {
                self.expr(expr);
                self.query(subquery);
            }
            Expr::BinaryOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::UnaryOp { expr, .. }
            | Expr::Nested(expr)
            | Expr::Cast { expr, .. }
            | Expr::IsNull(expr)
            | Expr::IsNotNull(expr)
            | Expr::IsTrue(expr)
            | Expr::IsFalse(expr) => self.expr(expr),
            Expr::Between {
                expr, low, high, ..
            } => {
                self.expr(expr);
                self.expr(low);
                self.expr(high);
            }
            Expr::InList { expr, list, .. } => {
                self.expr(expr);
                for item in list {
                    self.expr(item);
                }
            }
            Expr::Case {
                operand,
                conditions,
                else_result,
                ..
            } => {
                if let Some(operand) = operand {
                    self.expr(operand);
                }
                for case_when in conditions {
                    self.expr(&case_when.condition);
                    self.expr(&case_when.result);
                }
                if let Some(else_result) = else_result {
                    self.expr(else_result);
                }
            }
            Expr::Function(func) => match &func.args {
                FunctionArguments::List(list) => {
                    for arg in &list.args {
                        if let FunctionArg::Unnamed(FunctionArgExpr::Expr(e))
                        | FunctionArg::Named {
                            arg: FunctionArgExpr::Expr(e),
                            ..
                        } = arg
                        {
                            self.expr(e);
                        }
                    }
                }
                FunctionArguments::Subquery(query) => self.query(query),
                FunctionArguments::None => {}
            },
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dotted(sql: &str) -> Vec<String> {
        analyze(sql)
            .unwrap()
            .tables
            .iter()
            .map(TableRef::dotted)
            .collect()
    }

    #[test]
    fn finds_joins_and_three_part_names() {
        let tables = dotted(
            "SELECT u.id FROM prod.public.users u JOIN sales.orders o ON o.user_id = u.id",
        );
        assert_eq!(tables, vec!["prod.public.users", "sales.orders"]);
    }

    #[test]
    fn finds_tables_in_ctes_and_subqueries() {
        let tables = dotted(
            "WITH recent AS (SELECT * FROM sales.orders WHERE amount > 10) \
             SELECT * FROM recent WHERE user_id IN (SELECT id FROM prod.public.users) \
             AND EXISTS (SELECT 1 FROM (SELECT * FROM people.people) p)",
        );
        assert_eq!(tables, vec!["sales.orders", "prod.public.users", "people.people"]);
    }

    #[test]
    fn finds_subqueries_nested_in_expressions() {
        let tables = dotted(
            "SELECT CASE WHEN EXISTS (SELECT 1 FROM x.t) THEN 'y' ELSE 'n' END, \
             coalesce((SELECT max(id) FROM x.ids), 0) \
             FROM sales.orders o JOIN people.people p \
               ON p.id = o.person_id AND o.region IN (SELECT region FROM ref.regions) \
             WHERE o.amount BETWEEN (SELECT min(amount) FROM x.floor) AND 100 \
               AND o.kind IN ('a', (SELECT kind FROM x.kinds LIMIT 1)) \
             GROUP BY (SELECT 1 FROM x.grouping)",
        );
        assert_eq!(
            tables,
            vec![
                "sales.orders",
                "people.people",
                "ref.regions",
                "x.t",
                "x.ids",
                "x.floor",
                "x.kinds",
                "x.grouping",
            ]
        );
    }

    #[test]
    fn union_branches_are_walked() {
        let tables = dotted("SELECT a FROM x.t1 UNION ALL SELECT a FROM x.t2");
        assert_eq!(tables, vec!["x.t1", "x.t2"]);
    }

    #[test]
    fn table_functions_are_not_tables() {
        let tables = dotted("SELECT * FROM read_csv_auto('/tmp/people.csv')");
        assert!(tables.is_empty());
    }

    #[test]
    fn read_only_classification() {
        assert!(analyze("SELECT 1").unwrap().read_only);
        assert!(analyze("EXPLAIN SELECT * FROM x.t").unwrap().read_only);
        assert!(analyze("DESCRIBE x.t").unwrap().read_only);
        assert!(!analyze("DELETE FROM x.t").unwrap().read_only);
        assert!(!analyze("SELECT 1; DROP TABLE x.t").unwrap().read_only);
        assert!(!analyze("CREATE TABLE y AS SELECT 1").unwrap().read_only);
    }

    #[test]
    fn unparseable_sql_yields_none() {
        assert!(analyze("SELEC FROM WHERE ((").is_none());
        assert!(analyze("   ").is_none());
    }
}
