pub(crate) mod test_support;

mod reindex_scenarios;
