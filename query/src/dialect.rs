//! Backend syntax fragments. Consumed by providers when rendering SQL, never by the compiler itself.

use crate::ast::StringFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFunction {
    Lower,
    Upper,
    Trim,
    TrimStart,
    TrimEnd,
    Length,
    Coalesce,
    UtcNow,
}

impl From<StringFunction> for SqlFunction {
    fn from(function: StringFunction) -> Self {
        match function {
            StringFunction::ToLower => SqlFunction::Lower,
            StringFunction::ToUpper => SqlFunction::Upper,
            StringFunction::Trim => SqlFunction::Trim,
            StringFunction::TrimStart => SqlFunction::TrimStart,
            StringFunction::TrimEnd => SqlFunction::TrimEnd,
        }
    }
}

pub trait SqlDialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Paging clause, including its leading space. Empty when neither bound is set.
    fn paginate(&self, limit: Option<u64>, offset: Option<u64>) -> String;

    /// Placeholder for the 1-based parameter `index`
    fn parameter(&self, index: usize) -> String;

    fn quote_identifier(&self, name: &str) -> String;

    fn function_name(&self, function: SqlFunction) -> &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str { "postgres" }

    fn paginate(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        let mut clause = String::new();
        if let Some(limit) = limit {
            clause.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = offset {
            clause.push_str(&format!(" OFFSET {offset}"));
        }
        clause
    }

    fn parameter(&self, index: usize) -> String { format!("${index}") }

    fn quote_identifier(&self, name: &str) -> String { format!(r#""{}""#, name.replace('"', "\"\"")) }

    fn function_name(&self, function: SqlFunction) -> &'static str {
        match function {
            SqlFunction::Lower => "lower",
            SqlFunction::Upper => "upper",
            SqlFunction::Trim => "btrim",
            SqlFunction::TrimStart => "ltrim",
            SqlFunction::TrimEnd => "rtrim",
            SqlFunction::Length => "length",
            SqlFunction::Coalesce => "coalesce",
            SqlFunction::UtcNow => "now",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MsSqlDialect;

impl SqlDialect for MsSqlDialect {
    fn name(&self) -> &'static str { "mssql" }

    // OFFSET/FETCH needs an offset even when only a limit is given
    fn paginate(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match (limit, offset) {
            (None, None) => String::new(),
            (None, Some(offset)) => format!(" OFFSET {offset} ROWS"),
            (Some(limit), offset) => format!(" OFFSET {} ROWS FETCH NEXT {limit} ROWS ONLY", offset.unwrap_or(0)),
        }
    }

    fn parameter(&self, index: usize) -> String { format!("@p{index}") }

    fn quote_identifier(&self, name: &str) -> String { format!("[{}]", name.replace(']', "]]")) }

    fn function_name(&self, function: SqlFunction) -> &'static str {
        match function {
            SqlFunction::Lower => "LOWER",
            SqlFunction::Upper => "UPPER",
            SqlFunction::Trim => "TRIM",
            SqlFunction::TrimStart => "LTRIM",
            SqlFunction::TrimEnd => "RTRIM",
            SqlFunction::Length => "LEN",
            SqlFunction::Coalesce => "COALESCE",
            SqlFunction::UtcNow => "GETUTCDATE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_fragments() {
        let dialect = PostgresDialect;
        assert_eq!(dialect.paginate(Some(10), Some(20)), " LIMIT 10 OFFSET 20");
        assert_eq!(dialect.paginate(None, None), "");
        assert_eq!(dialect.parameter(3), "$3");
        assert_eq!(dialect.quote_identifier(r#"we"ird"#), r#""we""ird""#);
        assert_eq!(dialect.function_name(StringFunction::TrimStart.into()), "ltrim");
    }

    #[test]
    fn test_mssql_fragments() {
        let dialect = MsSqlDialect;
        assert_eq!(dialect.paginate(Some(10), None), " OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY");
        assert_eq!(dialect.paginate(None, Some(5)), " OFFSET 5 ROWS");
        assert_eq!(dialect.parameter(1), "@p1");
        assert_eq!(dialect.quote_identifier("a]b"), "[a]]b]");
        assert_eq!(dialect.function_name(SqlFunction::Length), "LEN");
    }
}
