mod fixtures;
mod test_aggregation;
mod test_reconciliation;
