pub(crate) mod test_support;

mod memoir_scenarios;
