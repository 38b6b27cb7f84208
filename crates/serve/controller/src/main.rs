mod ctx;

use serve_core_k8s::manager::Ctx;
use tokio::join;

#[tokio::main]
async fn main() {
    join!(
        self::ctx::inference_service::Ctx::spawn_crd(),
        self::ctx::trained_model::Ctx::spawn_crd(),
    );
}
