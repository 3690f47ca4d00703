mod partitioning;
