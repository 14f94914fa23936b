define_id_type!(NodeId, u32);
define_id_type!(ResourceUnitId, u32);

// Position of a workload instance in the seeded dispatch order.
define_id_type!(InstanceId, u32);
