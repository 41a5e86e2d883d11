fn main() {
    capnpc::CompilerCommand::new()
        .src_prefix("src/schema")
        .file("src/schema/rpc.capnp")
        .file("src/schema/raft.capnp")
        .file("src/schema/twophase.capnp")
        .run()
        .expect("schema compilation failed");
}
