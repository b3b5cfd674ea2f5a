use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, StatsResponse};

#[get("/stats/")]
pub async fn get_stats(state: web::Data<AppState>) -> impl Responder {
    let chain = &state.chain;
    let window = chain.difficulty_calculation_blocks();

    // One snapshot so height and intervals agree.
    let blocks = chain.blocks();
    let head = blocks.last();

    let last_interval_secs = match blocks.as_slice() {
        [.., older, newer] => Some(newer.timestamp - older.timestamp),
        _ => None,
    };

    // Average over the retarget window ending at the head (or the whole
    // chain while it is shorter than one window).
    let avg_interval_secs = head.and_then(|head| {
        let start = head.index.saturating_sub(window);
        chain.calculate_average_mining_time(start, head.index).ok()
    });

    HttpResponse::Ok().json(StatsResponse {
        height: blocks.len(),
        difficulty: head.map(|b| b.difficulty),
        next_difficulty: head.map(|b| b.next_block_difficulty),
        target_block_time_secs: chain.target_block_time(),
        adjust_window: window,
        last_interval_secs,
        avg_interval_secs,
        peers: state.network.peer_count(),
        broadcasts_seen: state.network.broadcasts().len(),
    })
}

#[cfg(test)]
mod tests {
    use actix_web::{App, test, web};

    use crate::api::init_routes;
    use crate::api::models::StatsResponse;
    use crate::api::testing::state;

    #[actix_web::test]
    async fn stats_describe_the_head() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(3)))
                .configure(init_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/stats/").to_request();
        let resp: StatsResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.height, 4);
        assert_eq!(resp.difficulty, Some(2));
        assert_eq!(resp.adjust_window, 5);
        assert_eq!(resp.target_block_time_secs, 10);
        assert!(resp.last_interval_secs.is_some());
        assert!(resp.avg_interval_secs.is_some());
        assert_eq!(resp.peers, 0);
    }

    #[actix_web::test]
    async fn genesis_only_has_no_intervals() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state(0)))
                .configure(init_routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/stats/").to_request();
        let resp: StatsResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(resp.height, 1);
        assert_eq!(resp.last_interval_secs, None);
        assert_eq!(resp.avg_interval_secs, None);
    }
}
