mod stats_test;
