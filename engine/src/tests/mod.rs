mod recovery_flow;
